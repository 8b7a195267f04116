//! Protocol implementations.

pub mod chunked;
pub mod srec;
pub mod talker;

// Re-export common types
pub use chunked::{ChunkedIo, EchoPolicy, MAX_COMMAND_BYTES, TransferBuffers};
pub use srec::{ChecksumPolicy, RecordKind, SRecord};
pub use talker::Talker;
