//! Error types for hc11flash.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::chunked::EchoPolicy;

/// Result type for hc11flash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Direction of a serial transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to MCU.
    Transmit,
    /// MCU to host.
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transmit => write!(f, "transmit"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Error type for hc11flash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport moved a different number of bytes than requested.
    ///
    /// A read timeout surfaces here with the count actually received.
    #[error("{direction} failed: requested {expected} bytes, transferred {actual}")]
    TransferShortfall {
        /// Transfer direction.
        direction: Direction,
        /// Bytes requested for the chunk.
        expected: usize,
        /// Bytes actually moved.
        actual: usize,
    },

    /// An echoed byte did not match what was sent.
    #[error(
        "Echo mismatch ({policy}) at byte {index}: sent 0x{sent:02X}, received 0x{received:02X}"
    )]
    EchoMismatch {
        /// Policy that rejected the byte.
        policy: EchoPolicy,
        /// Position of the offending byte in the logical transfer.
        index: usize,
        /// Byte transmitted.
        sent: u8,
        /// Byte received.
        received: u8,
    },

    /// Talker image does not fit in the bootloader's RAM window.
    #[error("Talker image exceeds {max} bytes")]
    ImageTooLarge {
        /// Maximum image size in bytes.
        max: usize,
    },

    /// File could not be opened, read or written.
    #[error("{}: {source}", path.display())]
    File {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Malformed S-record line.
    #[error("Invalid S-record on line {line}: {reason}")]
    InvalidRecord {
        /// 1-based line number (0 when parsing a detached line).
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Malformed hex string payload.
    #[error("Invalid hex data: {0}")]
    InvalidHex(String),

    /// Address range with `to < from`.
    #[error("Invalid address range: 0x{from:04X}..=0x{to:04X}")]
    InvalidRange {
        /// First address.
        from: u16,
        /// Last address.
        to: u16,
    },

    /// Unsupported operation for the selected talker protocol.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            #[cfg(feature = "native")]
            Self::Serial(_) => 10,
            Self::TransferShortfall { .. } => 10,
            Self::EchoMismatch { .. } => 11,
            Self::ImageTooLarge { .. } => 12,
            Self::File { .. } => 13,
            Self::InvalidRecord { .. } | Self::InvalidHex(_) | Self::InvalidRange { .. } => 14,
            Self::Unsupported(_) => 15,
            Self::Config(_) => 3,
        }
    }

    /// Whether this is a transport-level failure (shortfall, timeout or echo).
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Self::TransferShortfall { .. } | Self::EchoMismatch { .. }
        )
    }
}
