//! 68HC11 target description and session configuration.
//!
//! This module holds everything that is fixed per device family (register
//! map, bootloader baud rates) and the per-invocation [`SessionConfig`].

use crate::error::{Error, Result};
use crate::port::SerialConfig;
use crate::protocol::srec::{self, MAX_DATA_LEN};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Control register addresses (default register block at 0x1000).
pub mod registers {
    /// Block protect register.
    pub const BPROT: u16 = 0x1035;
    /// EPROM programming control (MC68HC711E20).
    pub const EPROG: u16 = 0x1036;
    /// EEPROM/EPROM programming control.
    pub const PPROG: u16 = 0x103B;
    /// Highest priority interrupt and miscellaneous register.
    pub const HPRIO: u16 = 0x103C;
    /// System configuration register. New values only read back after reset.
    pub const CONFIG: u16 = 0x103F;

    /// HPRIO value selecting special test mode (RBOOT = 0, IRV = 0).
    pub const HPRIO_SPECIAL_TEST: u8 = 0x66;
    /// BPROT value lifting all EEPROM/CONFIG protection.
    pub const BPROT_UNPROTECT: u8 = 0x00;
    /// BPROT value protecting EEPROM and CONFIG.
    pub const BPROT_PROTECT: u8 = 0x1F;
}

/// Baud rate the talker runs at once downloaded.
pub const TALKER_BAUD: u32 = 9600;

/// First EEPROM address on parts with the array at its reset location.
pub const EEPROM_START: u16 = 0xB600;

/// Talker wire protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TalkerProtocol {
    /// Separate write opcodes per memory technology; writes return a
    /// readback that is compared by the host.
    #[default]
    Opcode,
    /// Single write opcode with a direct echo of every payload byte;
    /// EEPROM/EPROM programming is driven by the host.
    Echo,
}

impl TalkerProtocol {
    /// Get the protocol from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "opcode" => Some(Self::Opcode),
            "echo" => Some(Self::Echo),
            _ => None,
        }
    }
}

impl fmt::Display for TalkerProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opcode => write!(f, "opcode"),
            Self::Echo => write!(f, "echo"),
        }
    }
}

impl FromStr for TalkerProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::Config(format!("unknown talker protocol '{s}'")))
    }
}

/// Bootloader download speed.
///
/// The ROM picks its rate from the E clock: 7618 baud is the fast rate for an
/// 8 MHz crystal, 1200 baud the slow one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BootBaud {
    /// 7618 baud.
    Fast,
    /// 1200 baud.
    #[default]
    Slow,
}

impl BootBaud {
    /// Line rate in baud.
    pub fn baud(self) -> u32 {
        match self {
            Self::Fast => 7618,
            Self::Slow => 1200,
        }
    }
}

/// Memory technology a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryTarget {
    /// RAM, registers and anything else writable directly.
    #[default]
    Ram,
    /// On-chip EEPROM.
    Eeprom,
    /// EPROM through PPROG.
    Eprom,
    /// EPROM through EPROG (MC68HC711E20, 12 V on VPPE).
    EpromE20,
}

impl MemoryTarget {
    /// Get the target from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "ram" | "normal" => Some(Self::Ram),
            "eeprom" | "ee" => Some(Self::Eeprom),
            "eprom" => Some(Self::Eprom),
            "eprom-e20" | "e20" => Some(Self::EpromE20),
            _ => None,
        }
    }

    /// Whether writes need a programming sequence (and a slower transport).
    pub fn is_programmable(self) -> bool {
        !matches!(self, Self::Ram)
    }
}

impl fmt::Display for MemoryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ram => write!(f, "normal memory"),
            Self::Eeprom => write!(f, "EEPROM"),
            Self::Eprom => write!(f, "EPROM"),
            Self::EpromE20 => write!(f, "EPROM (E20)"),
        }
    }
}

/// A region of the 16-bit address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryRegion {
    /// Inclusive address range.
    Range {
        /// First address.
        from: u16,
        /// Last address.
        to: u16,
    },
    /// Explicit payload anchored at `from`.
    Bytes {
        /// First address.
        from: u16,
        /// Payload.
        data: Vec<u8>,
    },
}

impl MemoryRegion {
    /// Inclusive range; fails when `to < from`.
    pub fn range(from: u16, to: u16) -> Result<Self> {
        if to < from {
            return Err(Error::InvalidRange { from, to });
        }
        Ok(Self::Range { from, to })
    }

    /// Payload decoded from a hex string.
    pub fn from_hex(from: u16, hex: &str) -> Result<Self> {
        let data = srec::decode_hex(hex)?;
        if data.is_empty() {
            return Err(Error::InvalidHex("empty payload".into()));
        }
        Ok(Self::Bytes { from, data })
    }

    /// First address.
    pub fn from(&self) -> u16 {
        match self {
            Self::Range { from, .. } | Self::Bytes { from, .. } => *from,
        }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> usize {
        match self {
            Self::Range { from, to } => usize::from(to.wrapping_sub(*from)) + 1,
            Self::Bytes { data, .. } => data.len(),
        }
    }

    /// Whether the region is empty (never true for a constructed region).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last address covered, wrapping at 0xFFFF.
    pub fn to(&self) -> u16 {
        match self {
            Self::Range { to, .. } => *to,
            Self::Bytes { from, data } => from.wrapping_add(data.len().saturating_sub(1) as u16),
        }
    }
}

/// Settings for one invocation. Immutable once an operation starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial device path.
    pub port_name: String,
    /// Bootloader download speed.
    pub boot_baud: BootBaud,
    /// Talker line rate.
    pub talker_baud: u32,
    /// Per-read timeout.
    pub timeout: Duration,
    /// Bytes per transport write.
    pub tx_chunk: usize,
    /// Bytes per transport read.
    pub rx_chunk: usize,
    /// Bytes per transport write while programming EEPROM/EPROM.
    ///
    /// Kept tiny because programming delays interact badly with OS-level
    /// write buffering.
    pub program_chunk: usize,
    /// Data bytes per S1 line when dumping memory.
    pub srec_line_len: usize,
    /// Compare CONFIG during verification.
    pub verify_config: bool,
    /// Hold time between enabling and disabling the programming voltage.
    pub program_delay: Duration,
    /// Wait after the talker download before switching baud rate.
    pub settle_delay: Duration,
    /// Talker wire protocol.
    pub protocol: TalkerProtocol,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            boot_baud: BootBaud::default(),
            talker_baud: TALKER_BAUD,
            timeout: Duration::from_millis(1000),
            tx_chunk: 256,
            rx_chunk: 256,
            program_chunk: 2,
            srec_line_len: 16,
            verify_config: false,
            program_delay: Duration::ZERO,
            settle_delay: Duration::from_millis(75),
            protocol: TalkerProtocol::default(),
        }
    }
}

impl SessionConfig {
    /// Create a configuration for the given port with defaults elsewhere.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    /// Set the bootloader speed.
    #[must_use]
    pub fn with_boot_baud(mut self, boot_baud: BootBaud) -> Self {
        self.boot_baud = boot_baud;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set transmit and receive chunk sizes.
    #[must_use]
    pub fn with_chunks(mut self, tx_chunk: usize, rx_chunk: usize) -> Self {
        self.tx_chunk = tx_chunk;
        self.rx_chunk = rx_chunk;
        self
    }

    /// Set the programming chunk size.
    #[must_use]
    pub fn with_program_chunk(mut self, program_chunk: usize) -> Self {
        self.program_chunk = program_chunk;
        self
    }

    /// Set the S-record data length for dumps.
    #[must_use]
    pub fn with_srec_line_len(mut self, len: usize) -> Self {
        self.srec_line_len = len;
        self
    }

    /// Include CONFIG in verification.
    #[must_use]
    pub fn with_verify_config(mut self, verify: bool) -> Self {
        self.verify_config = verify;
        self
    }

    /// Set the programming hold time.
    #[must_use]
    pub fn with_program_delay(mut self, delay: Duration) -> Self {
        self.program_delay = delay;
        self
    }

    /// Set the post-download settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the talker protocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: TalkerProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.tx_chunk == 0 || self.rx_chunk == 0 || self.program_chunk == 0 {
            return Err(Error::Config("chunk sizes must be at least 1".into()));
        }
        if !(1..=MAX_DATA_LEN).contains(&self.srec_line_len) {
            return Err(Error::Config(format!(
                "S-record data length must be 1..={MAX_DATA_LEN}, got {}",
                self.srec_line_len
            )));
        }
        if self.talker_baud == 0 {
            return Err(Error::Config("talker baud rate must be non-zero".into()));
        }
        Ok(())
    }

    /// Serial settings for the given line rate: 8N1, no flow control.
    pub fn serial_config(&self, baud_rate: u32) -> SerialConfig {
        SerialConfig::new(self.port_name.clone(), baud_rate).with_timeout(self.timeout)
    }

    /// Whether the byte at `addr` takes part in verification.
    pub fn verifies(&self, addr: u16) -> bool {
        self.verify_config || addr != registers::CONFIG
    }
}
