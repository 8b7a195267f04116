//! S-record files: line-oriented loading and streaming output.

use crate::error::{Error, Result};
use crate::protocol::srec::{
    self, ChecksumPolicy, MAX_DATA_LEN, RecordKind, SRecord, parse_line_checked,
};
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// Data records of an S-record source, in file order.
#[derive(Debug, Clone, Default)]
pub struct SrecImage {
    /// S1 records.
    pub records: Vec<SRecord>,
}

impl SrecImage {
    /// Load S1 records from a file, ignoring other record types.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file_checked(path, ChecksumPolicy::Lenient)
    }

    /// Load S1 records from a file with an explicit checksum policy.
    pub fn from_file_checked(path: impl AsRef<Path>, policy: ChecksumPolicy) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::File {
            path: path.to_path_buf(),
            source,
        })?;

        let image = Self::from_reader(BufReader::new(file), policy).map_err(|e| match e {
            Error::Io(source) => Error::File {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        debug!(
            "Loaded {} records ({} data bytes) from {}",
            image.records.len(),
            image.data_len(),
            path.display()
        );
        Ok(image)
    }

    /// Parse S1 records from any line source.
    pub fn from_reader<R: BufRead>(reader: R, policy: ChecksumPolicy) -> Result<Self> {
        let mut records = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let parsed = parse_line_checked(&line, &[RecordKind::S1], policy).map_err(|e| match e {
                Error::InvalidRecord { reason, .. } => Error::InvalidRecord {
                    line: index + 1,
                    reason,
                },
                other => other,
            })?;
            records.extend(parsed);
        }

        Ok(Self { records })
    }

    /// Total data bytes across records.
    pub fn data_len(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.data.len())
            .sum()
    }

    /// Summary for display.
    pub fn summary(&self) -> ImageSummary {
        let non_empty = self
            .records
            .iter()
            .filter(|r| !r.data.is_empty());
        ImageSummary {
            records: self.records.len(),
            data_bytes: self.data_len(),
            lowest: non_empty
                .clone()
                .map(|r| r.address)
                .min(),
            highest: non_empty
                .map(SRecord::end_address)
                .max(),
            bad_checksums: self
                .records
                .iter()
                .filter(|r| !r.checksum_ok())
                .count(),
        }
    }
}

/// What an S-record file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSummary {
    /// Number of S1 records.
    pub records: usize,
    /// Data bytes across all records.
    pub data_bytes: usize,
    /// Lowest start address.
    pub lowest: Option<u16>,
    /// Highest end address.
    pub highest: Option<u16>,
    /// Records whose checksum does not match their content.
    pub bad_checksums: usize,
}

/// Streams a byte sequence out as S0, S1 lines of fixed data length, S9.
///
/// Addresses advance by one per byte and wrap at 0xFFFF.
pub struct SrecWriter<W: Write> {
    out: W,
    line_len: usize,
    line_addr: u16,
    pending: Vec<u8>,
}

impl<W: Write> SrecWriter<W> {
    /// Write the header and start the first line at `start`.
    pub fn begin(mut out: W, start: u16, line_len: usize) -> Result<Self> {
        let line_len = line_len.clamp(1, MAX_DATA_LEN);
        out.write_all(srec::format_s0().as_bytes())?;
        Ok(Self {
            out,
            line_len,
            line_addr: start,
            pending: Vec::with_capacity(line_len),
        })
    }

    /// Append one byte; returns the record when it completes a line.
    pub fn push(&mut self, byte: u8) -> Result<Option<SRecord>> {
        self.pending.push(byte);
        if self.pending.len() < self.line_len {
            return Ok(None);
        }
        self.flush_line().map(Some)
    }

    /// Flush the partial line, write the terminator and return the output.
    ///
    /// The partial line's record, if any, is returned alongside.
    pub fn finish(mut self) -> Result<(W, Option<SRecord>)> {
        let last = if self.pending.is_empty() {
            None
        } else {
            Some(self.flush_line()?)
        };
        self.out
            .write_all(srec::format_s9().as_bytes())?;
        self.out.flush()?;
        Ok((self.out, last))
    }

    fn flush_line(&mut self) -> Result<SRecord> {
        let data = std::mem::replace(&mut self.pending, Vec::with_capacity(self.line_len));
        self.out
            .write_all(srec::format_s1(self.line_addr, &data).as_bytes())?;

        let record = SRecord::data_record(self.line_addr, data);
        self.line_addr = self
            .line_addr
            .wrapping_add(record.data.len() as u16);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn dump(start: u16, bytes: &[u8], line_len: usize) -> (String, Vec<SRecord>) {
        let mut writer = SrecWriter::begin(Vec::new(), start, line_len).unwrap();
        let mut lines = Vec::new();
        for &b in bytes {
            lines.extend(writer.push(b).unwrap());
        }
        let (out, last) = writer.finish().unwrap();
        lines.extend(last);
        (String::from_utf8(out).unwrap(), lines)
    }

    #[test]
    fn test_writer_full_line() {
        let bytes: Vec<u8> = (0..16).collect();
        let (text, lines) = dump(0x0000, &bytes, 16);
        assert_eq!(
            text,
            "S0030000FC\r\nS1130000000102030405060708090A0B0C0D0E0F74\r\nS9030000FC\r\n"
        );
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].byte_count(), 0x13);
    }

    #[test]
    fn test_writer_partial_last_line_and_wrap() {
        let (text, lines) = dump(0xFFFE, &[1, 2, 3, 4, 5], 2);
        let addrs: Vec<u16> = lines.iter().map(|r| r.address).collect();
        assert_eq!(addrs, vec![0xFFFE, 0x0000, 0x0002]);
        assert_eq!(lines[2].data, vec![5]);
        assert!(text.ends_with("S9030000FC\r\n"));
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_writer_output_reloads() {
        let bytes: Vec<u8> = (0..40).map(|i| i * 3).collect();
        let (text, _) = dump(0xB600, &bytes, 16);
        let image = SrecImage::from_reader(Cursor::new(text), ChecksumPolicy::Strict).unwrap();

        assert_eq!(image.records.len(), 3);
        assert_eq!(image.data_len(), 40);
        let data: Vec<u8> = image
            .records
            .iter()
            .flat_map(|r| r.data.clone())
            .collect();
        assert_eq!(data, bytes);
    }

    #[test]
    fn test_reader_reports_line_number() {
        let text = "S0030000FC\r\nS1040010AB40\r\nS1130000\r\n";
        let err = SrecImage::from_reader(Cursor::new(text), ChecksumPolicy::Lenient).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { line: 3, .. }));
    }

    #[test]
    fn test_summary() {
        let text = "S1040010AB40\r\nS1050020010200\r\nS9030000FC\r\n";
        let image = SrecImage::from_reader(Cursor::new(text), ChecksumPolicy::Lenient).unwrap();
        let summary = image.summary();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.data_bytes, 3);
        assert_eq!(summary.lowest, Some(0x0010));
        assert_eq!(summary.highest, Some(0x0021));
        assert_eq!(summary.bad_checksums, 1);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = SrecImage::from_file("/nonexistent/dir/talker.s19").unwrap_err();
        match err {
            Error::File { path, .. } => assert!(path.ends_with("talker.s19")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.s19");
        std::fs::write(&path, "S0030000FC\nS1040010AB40\nS9030000FC\n").unwrap();

        let image = SrecImage::from_file(&path).unwrap();
        assert_eq!(image.records, vec![SRecord::data_record(0x0010, vec![0xAB])]);
    }
}
