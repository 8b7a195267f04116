//! Motorola S-record codec (S0/S1/S9, 16-bit addresses).
//!
//! ```text
//! S1 13 0000 000102030405060708090A0B0C0D0E0F 74 \r\n
//! |  |  |    |                                |
//! |  |  |    data (byte count - 3 bytes)      checksum
//! |  |  address, big-endian
//! |  byte count = data + address (2) + checksum (1)
//! type
//! ```
//!
//! The checksum is the one's complement of the low byte of the sum of the
//! byte count, address and data bytes.

use crate::error::{Error, Result};
use std::fmt::Write as _;

/// Fixed header record.
pub const HEADER: &str = "S0030000FC\r\n";

/// Fixed terminator record.
pub const TERMINATOR: &str = "S9030000FC\r\n";

/// Address (2) + checksum (1) bytes counted in the byte-count field.
pub const ADDR_CHECKSUM_LEN: usize = 3;

/// Largest data payload an S1 record can carry.
pub const MAX_DATA_LEN: usize = 0xFF - ADDR_CHECKSUM_LEN;

/// Shortest line that can hold a record.
const MIN_LINE_LEN: usize = 8;

/// Record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Header.
    S0,
    /// Data with a 16-bit address.
    S1,
    /// Terminator with a 16-bit start address.
    S9,
}

impl RecordKind {
    /// Two-character type tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::S0 => "S0",
            Self::S1 => "S1",
            Self::S9 => "S9",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"S0" => Some(Self::S0),
            b"S1" => Some(Self::S1),
            b"S9" => Some(Self::S9),
            _ => None,
        }
    }
}

/// Whether the trailing checksum is validated on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// Accept records whatever their checksum.
    #[default]
    Lenient,
    /// Reject records whose checksum does not match.
    Strict,
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SRecord {
    /// Record type.
    pub kind: RecordKind,
    /// Address field.
    pub address: u16,
    /// Data bytes.
    pub data: Vec<u8>,
    /// Checksum as found in the file.
    pub checksum: u8,
}

impl SRecord {
    /// Build an S1 record with a correct checksum.
    pub fn data_record(address: u16, data: Vec<u8>) -> Self {
        let checksum = checksum(address, &data);
        Self {
            kind: RecordKind::S1,
            address,
            data,
            checksum,
        }
    }

    /// Byte-count field value.
    pub fn byte_count(&self) -> usize {
        self.data.len() + ADDR_CHECKSUM_LEN
    }

    /// Checksum the record should carry.
    pub fn expected_checksum(&self) -> u8 {
        checksum(self.address, &self.data)
    }

    /// Whether the stored checksum matches the content.
    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.expected_checksum()
    }

    /// Last address covered by the data (the start address when empty).
    pub fn end_address(&self) -> u16 {
        self.address
            .wrapping_add(self.data.len().saturating_sub(1) as u16)
    }
}

/// Checksum over byte count, address and data.
pub fn checksum(address: u16, data: &[u8]) -> u8 {
    let [hi, lo] = address.to_be_bytes();
    let sum = data
        .iter()
        .fold(
            ((data.len() + ADDR_CHECKSUM_LEN) as u8)
                .wrapping_add(hi)
                .wrapping_add(lo),
            |acc, &b| acc.wrapping_add(b),
        );
    !sum
}

/// Header line.
pub fn format_s0() -> &'static str {
    HEADER
}

/// Terminator line.
pub fn format_s9() -> &'static str {
    TERMINATOR
}

/// Format an S1 data line, `\r\n` terminated.
///
/// `data` must not exceed [`MAX_DATA_LEN`] bytes.
pub fn format_s1(address: u16, data: &[u8]) -> String {
    debug_assert!(data.len() <= MAX_DATA_LEN);

    let mut line = String::with_capacity(4 + 4 + data.len() * 2 + 2 + 2);
    let _ = write!(line, "S1{:02X}{address:04X}", data.len() + ADDR_CHECKSUM_LEN);
    for b in data {
        let _ = write!(line, "{b:02X}");
    }
    let _ = write!(line, "{:02X}\r\n", checksum(address, data));
    line
}

/// Parse one line, keeping only records whose kind is in `kinds`.
///
/// Lines shorter than 8 characters and filtered kinds yield `Ok(None)`. The
/// trailing checksum is not validated; see [`parse_line_checked`].
pub fn parse_line(line: &str, kinds: &[RecordKind]) -> Result<Option<SRecord>> {
    parse_line_checked(line, kinds, ChecksumPolicy::Lenient)
}

/// Parse one line with an explicit checksum policy.
pub fn parse_line_checked(
    line: &str,
    kinds: &[RecordKind],
    policy: ChecksumPolicy,
) -> Result<Option<SRecord>> {
    let line = line
        .trim_end()
        .as_bytes();
    if line.len() < MIN_LINE_LEN {
        return Ok(None);
    }

    let Some(kind) = RecordKind::from_tag(&line[..2]).filter(|k| kinds.contains(k)) else {
        return Ok(None);
    };

    let byte_count = usize::from(hex_byte(&line[2..4]).ok_or_else(|| invalid("bad byte count"))?);
    if byte_count < ADDR_CHECKSUM_LEN {
        return Err(invalid(&format!("byte count {byte_count} is below 3")));
    }
    if line.len() < 4 + 2 * byte_count {
        return Err(invalid(&format!(
            "byte count {byte_count} needs {} characters, line has {}",
            4 + 2 * byte_count,
            line.len()
        )));
    }

    let address = hex_byte(&line[4..6])
        .zip(hex_byte(&line[6..8]))
        .map(|(hi, lo)| u16::from_be_bytes([hi, lo]))
        .ok_or_else(|| invalid("bad address"))?;

    let data_len = byte_count - ADDR_CHECKSUM_LEN;
    let data = line[8..8 + 2 * data_len]
        .chunks(2)
        .map(hex_byte)
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| invalid("bad data byte"))?;

    let checksum_pos = 8 + 2 * data_len;
    let checksum = hex_byte(&line[checksum_pos..checksum_pos + 2])
        .ok_or_else(|| invalid("bad checksum field"))?;

    let record = SRecord {
        kind,
        address,
        data,
        checksum,
    };

    if policy == ChecksumPolicy::Strict && !record.checksum_ok() {
        return Err(invalid(&format!(
            "checksum 0x{:02X}, expected 0x{:02X}",
            record.checksum,
            record.expected_checksum()
        )));
    }

    Ok(Some(record))
}

/// Decode a hex string into bytes.
///
/// An odd digit count is padded with a leading `0`.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    let hex = hex.trim();
    let padded;
    let digits = if hex.len() % 2 == 1 {
        padded = format!("0{hex}");
        padded.as_bytes()
    } else {
        hex.as_bytes()
    };

    digits
        .chunks(2)
        .map(hex_byte)
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| Error::InvalidHex(hex.to_string()))
}

fn hex_byte(pair: &[u8]) -> Option<u8> {
    let digit = |c: u8| (c as char).to_digit(16);
    match pair {
        [hi, lo] => Some(((digit(*hi)? << 4) | digit(*lo)?) as u8),
        _ => None,
    }
}

fn invalid(reason: &str) -> Error {
    Error::InvalidRecord {
        line: 0,
        reason: reason.to_string(),
    }
}
