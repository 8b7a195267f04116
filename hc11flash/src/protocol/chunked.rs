//! Chunked transfer engine.
//!
//! USB serial adapters only move a limited number of bytes reliably per
//! call, so every logical transfer is split into pieces of at most the
//! configured chunk size. Each piece is a single transport call whose byte
//! count must match exactly; a short count is a hard failure, never a retry.
//!
//! ```text
//! transmit_receive(N bytes, chunk B):
//!
//!   write[0..B] -> read[0..B] -> check echo
//!   write[B..2B] -> read[B..2B] -> check echo
//!   ...                                     ceil(N / B) round trips
//! ```

use crate::error::{Direction, Error, Result};
use log::trace;
use std::fmt;
use std::io::{ErrorKind, Read, Write};

/// Largest byte count a single talker command can move.
pub const MAX_COMMAND_BYTES: usize = 256;

/// How a received chunk is checked against the transmitted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// No check; the received bytes are payload, not an echo.
    #[default]
    Ignore,
    /// Each received byte must equal the transmitted byte.
    VerifyDirect,
    /// Each received byte must equal the bitwise complement of the
    /// transmitted byte.
    VerifyComplement,
}

impl EchoPolicy {
    /// Check `received` against `sent`.
    ///
    /// `base_index` is the position of `sent[0]` in the whole transfer and is
    /// used to report the offending byte.
    pub fn check(self, sent: &[u8], received: &[u8], base_index: usize) -> Result<()> {
        let expected: fn(u8) -> u8 = match self {
            Self::Ignore => return Ok(()),
            Self::VerifyDirect => |b| b,
            Self::VerifyComplement => |b| !b,
        };

        match sent
            .iter()
            .zip(received)
            .position(|(&s, &r)| expected(s) != r)
        {
            Some(i) => Err(Error::EchoMismatch {
                policy: self,
                index: base_index + i,
                sent: sent[i],
                received: received[i],
            }),
            None => Ok(()),
        }
    }
}

impl fmt::Display for EchoPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::VerifyDirect => write!(f, "direct"),
            Self::VerifyComplement => write!(f, "complement"),
        }
    }
}

/// Transmit and receive buffers for one operation.
///
/// Each buffer holds at least `MAX_COMMAND_BYTES` and at least the
/// configured chunk size, and is reused for every chunk of the operation.
#[derive(Debug, Clone)]
pub struct TransferBuffers {
    tx: Vec<u8>,
    rx: Vec<u8>,
}

impl TransferBuffers {
    /// Allocate a buffer pair for the given chunk sizes.
    pub fn new(tx_chunk: usize, rx_chunk: usize) -> Self {
        Self {
            tx: vec![0; tx_chunk.max(MAX_COMMAND_BYTES)],
            rx: vec![0; rx_chunk.max(MAX_COMMAND_BYTES)],
        }
    }

    /// Transmit buffer.
    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    /// Mutable transmit buffer.
    pub fn tx_mut(&mut self) -> &mut [u8] {
        &mut self.tx
    }

    /// Receive buffer.
    pub fn rx(&self) -> &[u8] {
        &self.rx
    }

    /// Mutable receive buffer.
    pub fn rx_mut(&mut self) -> &mut [u8] {
        &mut self.rx
    }

    /// Split into the transmit buffer and the mutable receive buffer.
    pub fn split(&mut self) -> (&mut [u8], &mut [u8]) {
        (&mut self.tx, &mut self.rx)
    }
}

/// Chunked transfer engine over a byte transport.
pub struct ChunkedIo<'a, P: Read + Write> {
    port: &'a mut P,
    tx_chunk: usize,
    rx_chunk: usize,
}

impl<'a, P: Read + Write> ChunkedIo<'a, P> {
    /// Create an engine with the given transmit and receive chunk sizes.
    ///
    /// Zero chunk sizes are raised to 1.
    pub fn new(port: &'a mut P, tx_chunk: usize, rx_chunk: usize) -> Self {
        Self {
            port,
            tx_chunk: tx_chunk.max(1),
            rx_chunk: rx_chunk.max(1),
        }
    }

    /// Transmit chunk size.
    pub fn tx_chunk(&self) -> usize {
        self.tx_chunk
    }

    /// Receive chunk size.
    pub fn rx_chunk(&self) -> usize {
        self.rx_chunk
    }

    /// Access the underlying transport.
    pub fn port_mut(&mut self) -> &mut P {
        self.port
    }

    /// Transmit `bytes` in chunks of at most the transmit chunk size.
    pub fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(self.tx_chunk) {
            self.write_chunk(chunk)?;
        }
        Ok(())
    }

    /// Fill `buf` in chunks of at most the receive chunk size.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<()> {
        let rx_chunk = self.rx_chunk;
        for chunk in buf.chunks_mut(rx_chunk) {
            self.read_chunk(chunk)?;
        }
        Ok(())
    }

    /// Write then read back each chunk of `tx`, checking it with `policy`.
    ///
    /// `rx` must be at least as long as `tx`; the received bytes land in
    /// `rx[..tx.len()]`.
    pub fn transmit_receive(&mut self, tx: &[u8], rx: &mut [u8], policy: EchoPolicy) -> Result<()> {
        self.transmit_receive_chunked(tx, rx, policy, self.tx_chunk)
    }

    /// Like [`transmit_receive`](Self::transmit_receive) with an explicit
    /// transmit chunk size.
    pub fn transmit_receive_chunked(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        policy: EchoPolicy,
        chunk: usize,
    ) -> Result<()> {
        let chunk = chunk.max(1);
        let rx = &mut rx[..tx.len()];
        let mut offset = 0;

        for (sent, received) in tx
            .chunks(chunk)
            .zip(rx.chunks_mut(chunk))
        {
            self.write_chunk(sent)?;
            self.receive(received)?;
            policy.check(sent, received, offset)?;
            offset += sent.len();
        }
        Ok(())
    }

    /// One transport write; the whole chunk must be accepted.
    pub(crate) fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let written = match self.port.write(chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(Error::Io(e)),
        };
        trace!("tx {written}/{} bytes", chunk.len());

        if written != chunk.len() {
            return Err(Error::TransferShortfall {
                direction: Direction::Transmit,
                expected: chunk.len(),
                actual: written,
            });
        }
        self.port.flush()?;
        Ok(())
    }

    /// Read until `chunk` is full; a timeout or end of stream is a shortfall.
    pub(crate) fn read_chunk(&mut self, chunk: &mut [u8]) -> Result<()> {
        let mut filled = 0;

        while filled < chunk.len() {
            match self.port.read(&mut chunk[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        trace!("rx {filled}/{} bytes", chunk.len());

        if filled != chunk.len() {
            return Err(Error::TransferShortfall {
                direction: Direction::Receive,
                expected: chunk.len(),
                actual: filled,
            });
        }
        Ok(())
    }
}
