//! Target device support.

pub mod chip;
pub mod hc11;

pub use chip::{
    BootBaud, EEPROM_START, MemoryRegion, MemoryTarget, SessionConfig, TALKER_BAUD,
    TalkerProtocol, registers,
};
