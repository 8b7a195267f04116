//! Talker download through the ROM bootloader.
//!
//! The bootloader waits for a sync byte (`0xFF`, not echoed), then receives
//! exactly 256 bytes into RAM, echoing each one, and jumps to 0x0000.
//!
//! ```text
//! host:  FF  b0  b1  ...  b254  b255
//! MCU :      b0  b1  ...  b254  (b255)   <- last echo may be lost
//! ```
//!
//! The bootloader changes its baud rate as the last byte goes out, and some
//! USB serial adapters never deliver that final echo. The last byte of the
//! transfer is therefore read and checked, but a failure there is logged and
//! dropped.

use crate::error::{Error, Result};
use crate::image::srec_file::SrecImage;
use crate::protocol::chunked::{ChunkedIo, EchoPolicy, TransferBuffers};
use crate::protocol::srec::SRecord;
use log::{debug, warn};
use std::io::{Read, Write};
use std::path::Path;

/// Size of the bootloader's RAM image.
pub const BOOTLOADER_MAX_BYTES: usize = 256;

/// Leading synchronization byte.
pub const SYNC_BYTE: u8 = 0xFF;

/// A talker program, padded to the bootloader's image size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkerImage {
    bytes: [u8; BOOTLOADER_MAX_BYTES],
    code_len: usize,
}

impl TalkerImage {
    /// Concatenate the data of `records` in order and pad with `0x00`.
    ///
    /// Record addresses are not used: the bootloader always loads at 0x0000.
    pub fn from_records(records: &[SRecord]) -> Result<Self> {
        let mut bytes = [0u8; BOOTLOADER_MAX_BYTES];
        let mut code_len = 0;

        for &b in records
            .iter()
            .flat_map(|r| &r.data)
        {
            if code_len == BOOTLOADER_MAX_BYTES {
                return Err(Error::ImageTooLarge {
                    max: BOOTLOADER_MAX_BYTES,
                });
            }
            bytes[code_len] = b;
            code_len += 1;
        }

        Ok(Self { bytes, code_len })
    }

    /// Load a talker from an S-record file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let image = SrecImage::from_file(path)?;
        Self::from_records(&image.records)
    }

    /// The padded image as transmitted.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bytes of actual program before padding.
    pub fn code_len(&self) -> usize {
        self.code_len
    }
}

/// Send the sync byte and the image, tolerating a lost final echo.
///
/// Baud rate switching and the settle delay around this are the caller's.
pub fn download<P: Read + Write>(
    io: &mut ChunkedIo<'_, P>,
    buffers: &mut TransferBuffers,
    image: &TalkerImage,
) -> Result<()> {
    debug!("Transmitting sync byte 0x{SYNC_BYTE:02X}");
    io.transmit(&[SYNC_BYTE])?;

    debug!(
        "Transmitting talker ({} bytes of code, {} padded)",
        image.code_len(),
        BOOTLOADER_MAX_BYTES
    );
    let tx = image.as_bytes();
    let rx = &mut buffers.rx_mut()[..tx.len()];
    let chunk = io.tx_chunk();
    let chunk_count = tx.len().div_ceil(chunk);

    for (i, (sent, received)) in tx
        .chunks(chunk)
        .zip(rx.chunks_mut(chunk))
        .enumerate()
    {
        let offset = i * chunk;
        io.write_chunk(sent)?;

        if i + 1 < chunk_count {
            io.receive(received)?;
            EchoPolicy::VerifyDirect.check(sent, received, offset)?;
            continue;
        }

        // Final chunk: everything but the last byte is checked normally
        let last = sent.len() - 1;
        if last > 0 {
            io.receive(&mut received[..last])?;
            EchoPolicy::VerifyDirect.check(&sent[..last], &received[..last], offset)?;
        }

        let last_echo = io
            .read_chunk(&mut received[last..])
            .and_then(|()| {
                EchoPolicy::VerifyDirect.check(&sent[last..], &received[last..], offset + last)
            });
        match last_echo {
            Ok(()) => {},
            Err(e @ (Error::TransferShortfall { .. } | Error::EchoMismatch { .. })) => {
                warn!("Ignoring missing echo of the final talker byte: {e}");
            },
            Err(e) => return Err(e),
        }
    }

    debug!("Talker download complete");
    Ok(())
}
