//! 68HC11 bootstrap-mode support.

pub mod bootstrap;
pub mod flasher;
pub mod program;

pub use bootstrap::{BOOTLOADER_MAX_BYTES, SYNC_BYTE, TalkerImage};
pub use flasher::{Hc11Flasher, LineReport, VerifyTally};
pub use program::{CellOperation, EpromRegister, EraseMode};
