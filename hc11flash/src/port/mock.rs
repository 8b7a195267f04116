//! Test doubles for the serial link.
//!
//! `ScriptedPort` replays a fixed response stream. `SimulatedMcu` models a
//! 68HC11 in bootstrap mode: the ROM bootloader echo, then a talker serving
//! reads and writes against 64 KiB of memory, including the PPROG/EPROG
//! programming sequences and the CONFIG register that reads back stale.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::talker::opcode;
use crate::target::chip::{TalkerProtocol, registers};

/// Port with a canned response stream and independent write log.
pub(crate) struct ScriptedPort {
    read_buf: VecDeque<u8>,
    pub writes: Vec<Vec<u8>>,
    write_limit: Option<usize>,
    read_limit: Option<usize>,
    timeout: Duration,
    baud_rate: u32,
}

impl ScriptedPort {
    pub fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response.iter().copied().collect(),
            writes: Vec::new(),
            write_limit: None,
            read_limit: None,
            timeout: Duration::from_millis(100),
            baud_rate: 9600,
        }
    }

    /// Accept at most `n` bytes per write call.
    pub fn with_write_limit(mut self, n: usize) -> Self {
        self.write_limit = Some(n);
        self
    }

    /// Return at most `n` bytes per read call.
    pub fn with_read_limit(mut self, n: usize) -> Self {
        self.read_limit = Some(n);
        self
    }

    /// Everything written, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(self.read_buf.len())
            .min(self.read_limit.unwrap_or(usize::MAX));
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.write_limit.unwrap_or(usize::MAX));
        self.writes.push(buf[..n].to_vec());
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

const EEPROM_START: u16 = 0xB600;
const EEPROM_END: u16 = 0xB7FF;

// PPROG / EPROG bits
const EPGM: u8 = 0x01;
const EELAT: u8 = 0x02;
const ERASE: u8 = 0x04;
const ROW: u8 = 0x08;
const BYTE: u8 = 0x10;
const ELAT: u8 = 0x20;

#[derive(Debug)]
enum Mode {
    Boot { synced: bool, received: usize },
    Idle,
    Params { cmd: u8, got: Vec<u8> },
    Payload { cmd: u8, addr: u16, remaining: usize },
}

/// A talker command as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SeenCommand {
    pub opcode: u8,
    pub len: usize,
    pub addr: u16,
}

/// Simulated MCU behind the serial link.
pub(crate) struct SimulatedMcu {
    protocol: TalkerProtocol,
    mode: Mode,
    memory: Vec<u8>,
    config_shadow: u8,
    latched: Option<(u16, u8)>,
    drop_boot_echo: Option<usize>,
    corrupt_echo_at: Option<usize>,
    payload_index: usize,
    read_buf: VecDeque<u8>,
    pub writes: Vec<Vec<u8>>,
    pub commands: Vec<SeenCommand>,
    pub pokes: Vec<(u16, u8)>,
    pub baud_history: Vec<u32>,
    pub clears: usize,
    timeout: Duration,
    baud_rate: u32,
}

impl SimulatedMcu {
    /// MCU that already runs the talker.
    pub fn talker(protocol: TalkerProtocol) -> Self {
        let mut memory = vec![0xFF; 0x1_0000];
        // Programming control registers reset to zero
        memory[usize::from(registers::PPROG)] = 0x00;
        memory[usize::from(registers::EPROG)] = 0x00;

        Self {
            protocol,
            mode: Mode::Idle,
            memory,
            config_shadow: 0xFF,
            latched: None,
            drop_boot_echo: None,
            corrupt_echo_at: None,
            payload_index: 0,
            read_buf: VecDeque::new(),
            writes: Vec::new(),
            commands: Vec::new(),
            pokes: Vec::new(),
            baud_history: Vec::new(),
            clears: 0,
            timeout: Duration::from_millis(100),
            baud_rate: 9600,
        }
    }

    /// MCU waiting in the ROM bootloader.
    pub fn bootstrap(protocol: TalkerProtocol) -> Self {
        let mut mcu = Self::talker(protocol);
        mcu.mode = Mode::Boot {
            synced: false,
            received: 0,
        };
        mcu
    }

    /// The bootloader does not echo image byte `index`.
    pub fn dropping_boot_echo(mut self, index: usize) -> Self {
        self.drop_boot_echo = Some(index);
        self
    }

    /// The talker echoes payload byte `index` (counted over the session)
    /// with its bits flipped.
    pub fn corrupting_echo(mut self, index: usize) -> Self {
        self.corrupt_echo_at = Some(index);
        self
    }

    /// Preload memory at `addr`.
    pub fn with_memory(mut self, addr: u16, bytes: &[u8]) -> Self {
        for (i, &b) in bytes.iter().enumerate() {
            let a = addr.wrapping_add(i as u16);
            self.memory[usize::from(a)] = b;
            if a == registers::CONFIG {
                self.config_shadow = b;
            }
        }
        self
    }

    /// Current memory content, as stored (CONFIG included).
    pub fn memory(&self, addr: u16) -> u8 {
        self.memory[usize::from(addr)]
    }

    /// Whether the talker is running.
    pub fn talker_running(&self) -> bool {
        !matches!(self.mode, Mode::Boot { .. })
    }

    fn read_mem(&self, addr: u16) -> u8 {
        if addr == registers::CONFIG {
            self.config_shadow
        } else {
            self.memory[usize::from(addr)]
        }
    }

    fn valid_opcode(&self, cmd: u8) -> bool {
        match self.protocol {
            TalkerProtocol::Opcode => matches!(
                cmd,
                opcode::READ
                    | opcode::WRITE
                    | opcode::WRITE_EEPROM
                    | opcode::WRITE_EPROM
                    | opcode::WRITE_EPROM_E20
            ),
            TalkerProtocol::Echo => matches!(cmd, opcode::READ | opcode::ECHO_WRITE),
        }
    }

    fn store(&mut self, addr: u16, value: u8) {
        // CONFIG only takes effect after reset
        self.memory[usize::from(addr)] = value;
    }

    fn poke(&mut self, cmd: u8, addr: u16, value: u8) {
        self.pokes.push((addr, value));

        if cmd != opcode::WRITE && cmd != opcode::ECHO_WRITE {
            // Talker-side programming opcodes
            self.store(addr, value);
            return;
        }

        if addr == registers::PPROG || addr == registers::EPROG {
            self.memory[usize::from(addr)] = value;
            if value & EPGM != 0 {
                if let Some((target, data)) = self.latched {
                    self.program(value, target, data);
                }
            }
            if value == 0 {
                self.latched = None;
            }
            return;
        }

        let pprog = self.memory[usize::from(registers::PPROG)];
        let eprog = self.memory[usize::from(registers::EPROG)];
        if pprog & (EELAT | ELAT) != 0 || eprog & ELAT != 0 {
            self.latched = Some((addr, value));
        } else {
            self.store(addr, value);
        }
    }

    fn program(&mut self, control: u8, target: u16, data: u8) {
        if control & ERASE != 0 {
            let range = if control & ROW != 0 {
                let start = target & !0x000F;
                start..=start + 0x0F
            } else if control & BYTE != 0 {
                target..=target
            } else {
                self.memory[usize::from(registers::CONFIG)] = 0xFF;
                EEPROM_START..=EEPROM_END
            };
            for a in range {
                self.memory[usize::from(a)] = 0xFF;
            }
        } else {
            self.memory[usize::from(target)] &= data;
        }
    }

    fn feed(&mut self, byte: u8) {
        match std::mem::replace(&mut self.mode, Mode::Idle) {
            Mode::Boot { synced: false, .. } => {
                self.mode = Mode::Boot {
                    synced: true,
                    received: 0,
                };
            },
            Mode::Boot {
                synced: true,
                received,
            } => {
                self.memory[received] = byte;
                if self.drop_boot_echo != Some(received) {
                    self.read_buf.push_back(byte);
                }
                self.mode = if received + 1 == 256 {
                    Mode::Idle
                } else {
                    Mode::Boot {
                        synced: true,
                        received: received + 1,
                    }
                };
            },
            Mode::Idle => {
                if self.valid_opcode(byte) {
                    self.read_buf.push_back(!byte);
                    self.mode = Mode::Params {
                        cmd: byte,
                        got: Vec::with_capacity(3),
                    };
                }
            },
            Mode::Params { cmd, mut got } => {
                got.push(byte);
                if got.len() < 3 {
                    self.mode = Mode::Params { cmd, got };
                    return;
                }
                let len = if got[0] == 0 { 256 } else { usize::from(got[0]) };
                let addr = u16::from_be_bytes([got[1], got[2]]);
                self.commands.push(SeenCommand {
                    opcode: cmd,
                    len,
                    addr,
                });

                if cmd == opcode::READ {
                    for i in 0..len {
                        let b = self.read_mem(addr.wrapping_add(i as u16));
                        self.read_buf.push_back(b);
                    }
                } else {
                    self.mode = Mode::Payload {
                        cmd,
                        addr,
                        remaining: len,
                    };
                }
            },
            Mode::Payload {
                cmd,
                addr,
                remaining,
            } => {
                self.poke(cmd, addr, byte);
                let reply = match self.protocol {
                    TalkerProtocol::Echo => byte,
                    TalkerProtocol::Opcode => self.read_mem(addr),
                };
                let reply = if self.corrupt_echo_at == Some(self.payload_index) {
                    !reply
                } else {
                    reply
                };
                self.payload_index += 1;
                self.read_buf.push_back(reply);

                if remaining > 1 {
                    self.mode = Mode::Payload {
                        cmd,
                        addr: addr.wrapping_add(1),
                        remaining: remaining - 1,
                    };
                }
            },
        }
    }
}

impl Read for SimulatedMcu {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.read_buf.len());
        for b in buf.iter_mut().take(n) {
            *b = self.read_buf.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for SimulatedMcu {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.push(buf.to_vec());
        for &b in buf {
            self.feed(b);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimulatedMcu {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.baud_rate = baud_rate;
        self.baud_history.push(baud_rate);
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.read_buf.clear();
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
