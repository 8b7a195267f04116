//! # hc11flash
//!
//! A library for reading and programming 68HC11 microcontrollers through
//! their bootstrap ROM.
//!
//! The bootstrap ROM accepts a 256-byte "talker" program over the serial
//! line and runs it from RAM. The talker then serves memory reads and writes,
//! which this crate uses to:
//!
//! - dump memory to Motorola S-records
//! - verify memory against an S-record file
//! - write RAM, registers, EEPROM and EPROM
//! - erase and program EEPROM/EPROM cells byte by byte
//!
//! ## Supported Talkers
//!
//! - **Opcode** talkers with one write opcode per memory technology
//! - **Echo** talkers with a single echoing write opcode
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use hc11flash::{Hc11Flasher, MemoryRegion, SessionConfig, TalkerImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SessionConfig::new("/dev/ttyUSB0");
//!         let mut flasher = Hc11Flasher::open(config)?;
//!         flasher.upload_talker(&TalkerImage::load("talker.s19")?)?;
//!
//!         let region = MemoryRegion::range(0xB600, 0xB7FF)?;
//!         let dump = flasher.read_memory(&region, Vec::new(), |record| {
//!             println!("{:04X}: {:02X?}", record.address, record.data);
//!         })?;
//!         std::fs::write("eeprom.s19", dump)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    image::srec_file::{ImageSummary, SrecImage, SrecWriter},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        chunked::{ChunkedIo, EchoPolicy, TransferBuffers},
        srec::{ChecksumPolicy, RecordKind, SRecord},
        talker::Talker,
    },
    target::{
        chip::{BootBaud, MemoryRegion, MemoryTarget, SessionConfig, TalkerProtocol, registers},
        hc11::{
            CellOperation, EpromRegister, EraseMode, Hc11Flasher, LineReport, TalkerImage,
            VerifyTally,
        },
    },
};
