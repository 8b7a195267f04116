//! Talker memory access protocol.
//!
//! Every access is one command frame:
//!
//! ```text
//! +---------+        +-----+---------+---------+-----------------+
//! | command | -echo- | len | addr hi | addr lo | payload (len)   |
//! +---------+        +-----+---------+---------+-----------------+
//!     1      ~command   1       1         1      host -> MCU (write)
//!                                                MCU -> host (read)
//! ```
//!
//! The talker answers the command byte with its bitwise complement, which
//! keeps host and talker in step. Parameters are sent without echo. A length
//! of 256 travels as `0x00`.

use byteorder::{BigEndian, WriteBytesExt};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::chunked::{ChunkedIo, EchoPolicy, MAX_COMMAND_BYTES, TransferBuffers};
use crate::target::chip::{MemoryTarget, SessionConfig, TalkerProtocol};
use log::trace;

/// Command opcodes.
pub mod opcode {
    /// Read memory (both variants).
    pub const READ: u8 = 0x01;
    /// Write normal memory.
    pub const WRITE: u8 = 0x02;
    /// Write EEPROM; the talker runs the programming sequence.
    pub const WRITE_EEPROM: u8 = 0x03;
    /// Write EPROM through PPROG.
    pub const WRITE_EPROM: u8 = 0x04;
    /// Write EPROM through EPROG (MC68HC711E20).
    pub const WRITE_EPROM_E20: u8 = 0x05;
    /// Write memory with direct echo (echo variant).
    pub const ECHO_WRITE: u8 = 0x41;
}

/// Length byte for a block of `len` bytes (1..=256).
pub fn length_byte(len: usize) -> u8 {
    // 256 wraps to 0
    len as u8
}

/// Protocol session over an open port.
///
/// Owns the transfer buffer pair for the duration of one operation.
pub struct Talker<'a, P: Port> {
    io: ChunkedIo<'a, P>,
    buffers: TransferBuffers,
    protocol: TalkerProtocol,
    program_chunk: usize,
    read_block: usize,
}

impl<'a, P: Port> Talker<'a, P> {
    /// Start a session with the chunk sizes and protocol from `config`.
    pub fn new(port: &'a mut P, config: &SessionConfig) -> Self {
        Self {
            io: ChunkedIo::new(port, config.tx_chunk, config.rx_chunk),
            buffers: TransferBuffers::new(config.tx_chunk, config.rx_chunk),
            protocol: config.protocol,
            program_chunk: config.program_chunk.max(1),
            read_block: config.rx_chunk.clamp(1, MAX_COMMAND_BYTES),
        }
    }

    /// Protocol variant in use.
    pub fn protocol(&self) -> TalkerProtocol {
        self.protocol
    }

    /// Bytes requested per read command.
    pub fn read_block(&self) -> usize {
        self.read_block
    }

    /// Write opcode for `target`, if this variant has one.
    pub fn write_opcode(&self, target: MemoryTarget) -> Option<u8> {
        match (self.protocol, target) {
            (TalkerProtocol::Opcode, MemoryTarget::Ram) => Some(opcode::WRITE),
            (TalkerProtocol::Opcode, MemoryTarget::Eeprom) => Some(opcode::WRITE_EEPROM),
            (TalkerProtocol::Opcode, MemoryTarget::Eprom) => Some(opcode::WRITE_EPROM),
            (TalkerProtocol::Opcode, MemoryTarget::EpromE20) => Some(opcode::WRITE_EPROM_E20),
            (TalkerProtocol::Echo, MemoryTarget::Ram) => Some(opcode::ECHO_WRITE),
            (TalkerProtocol::Echo, _) => None,
        }
    }

    /// Send a command byte, check its complement echo, then the parameters.
    fn send_command(&mut self, command: u8, len: usize, addr: u16) -> Result<()> {
        if !(1..=MAX_COMMAND_BYTES).contains(&len) {
            return Err(Error::Unsupported(format!(
                "a talker command moves 1..={MAX_COMMAND_BYTES} bytes, not {len}"
            )));
        }
        trace!("command 0x{command:02X}: {len} bytes at 0x{addr:04X}");

        let (tx, rx) = self.buffers.split();
        tx[0] = command;
        self.io
            .transmit_receive(&tx[..1], &mut rx[..1], EchoPolicy::VerifyComplement)?;

        let mut header = &mut tx[..3];
        header.write_u8(length_byte(len))?;
        header.write_u16::<BigEndian>(addr)?;
        self.io.transmit(&tx[..3])
    }

    /// Read `len` bytes (1..=256) starting at `addr`.
    ///
    /// The returned slice borrows the session's receive buffer.
    pub fn read(&mut self, addr: u16, len: usize) -> Result<&[u8]> {
        self.send_command(opcode::READ, len, addr)?;
        let rx = &mut self.buffers.rx_mut()[..len];
        self.io.receive(rx)?;
        Ok(&self.buffers.rx()[..len])
    }

    /// Write `data` (1..=256 bytes) at `addr` into `target`.
    ///
    /// Returns what the talker sent back: the verified echo on the echo
    /// variant, or the talker's post-write readback on the opcode variant.
    pub fn write(&mut self, addr: u16, data: &[u8], target: MemoryTarget) -> Result<&[u8]> {
        let command = self.write_opcode(target).ok_or_else(|| {
            Error::Unsupported(format!(
                "the {} talker has no write opcode for {target}",
                self.protocol
            ))
        })?;
        self.send_command(command, data.len(), addr)?;

        let (policy, chunk) = match self.protocol {
            TalkerProtocol::Echo => (EchoPolicy::VerifyDirect, self.io.tx_chunk()),
            TalkerProtocol::Opcode if target.is_programmable() => {
                (EchoPolicy::Ignore, self.program_chunk)
            },
            TalkerProtocol::Opcode => (EchoPolicy::Ignore, self.io.tx_chunk()),
        };

        let len = data.len();
        let (tx, rx) = self.buffers.split();
        tx[..len].copy_from_slice(data);
        self.io
            .transmit_receive_chunked(&tx[..len], &mut rx[..len], policy, chunk)?;
        Ok(&self.buffers.rx()[..len])
    }

    /// Write a single byte to normal memory.
    pub fn write_byte(&mut self, addr: u16, value: u8) -> Result<()> {
        trace!("poke 0x{addr:04X} = 0x{value:02X}");
        self.write(addr, &[value], MemoryTarget::Ram)
            .map(|_| ())
    }
}
