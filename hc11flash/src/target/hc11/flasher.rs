//! 68HC11 bootstrap flasher.
//!
//! [`Hc11Flasher`] owns the open port and the session configuration and runs
//! one operation at a time:
//!
//! ```text
//! upload_talker   ROM bootloader  -> talker running at 9600 baud
//! read_memory     talker READ     -> S-record stream
//! verify_records  talker READ     -> per-line tally against a file
//! write_*         talker WRITE    -> echo / readback tally
//! program_*       PPROG / EPROG   -> byte-by-byte cell programming
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use hc11flash::{Hc11Flasher, SessionConfig, SrecImage, TalkerImage};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new("/dev/ttyUSB0");
//!     let mut flasher = Hc11Flasher::open(config)?;
//!
//!     flasher.upload_talker(&TalkerImage::load("talker.s19")?)?;
//!
//!     let image = SrecImage::from_file("firmware.s19")?;
//!     let tally = flasher.verify_records(&image.records, |line| {
//!         println!("{:04X}: {line}", line.address);
//!     })?;
//!     println!("{tally}");
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::image::srec_file::SrecWriter;
use crate::port::Port;
use crate::protocol::chunked::{ChunkedIo, MAX_COMMAND_BYTES, TransferBuffers};
use crate::protocol::srec::SRecord;
use crate::protocol::talker::Talker;
use crate::target::chip::{
    EEPROM_START, MemoryRegion, MemoryTarget, SessionConfig, TalkerProtocol, registers,
};
use crate::target::hc11::bootstrap::{self, TalkerImage};
use crate::target::hc11::program::{self, EpromRegister, EraseMode};
use log::{debug, info};
use std::fmt;
use std::io::Write;
use std::thread;

/// Dummy data byte written during erase sequences.
const ERASE_DUMMY: u8 = 0xFF;

/// Comparison of one line (or one write command) against the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineReport {
    /// First address of the line.
    pub address: u16,
    /// Bytes sent or read from the file.
    pub expected: Vec<u8>,
    /// Bytes the device returned.
    pub received: Vec<u8>,
    /// Bytes equal to the expected value.
    pub matched: usize,
    /// Bytes differing from the expected value.
    pub mismatched: usize,
    /// Bytes not compared (CONFIG).
    pub ignored: usize,
}

impl LineReport {
    fn compare(config: &SessionConfig, address: u16, expected: &[u8], received: &[u8]) -> Self {
        let mut report = Self {
            address,
            expected: expected.to_vec(),
            received: received.to_vec(),
            matched: 0,
            mismatched: 0,
            ignored: 0,
        };

        for (i, (want, got)) in expected
            .iter()
            .zip(received)
            .enumerate()
        {
            let addr = address.wrapping_add(i as u16);
            if !config.verifies(addr) {
                report.ignored += 1;
            } else if want == got {
                report.matched += 1;
            } else {
                report.mismatched += 1;
            }
        }
        report
    }

    /// Bytes on the line.
    pub fn len(&self) -> usize {
        self.received.len()
    }

    /// Whether the line carried no data.
    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}

impl fmt::Display for LineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mismatched, self.ignored) {
            (0, 0) => write!(f, "{} matched", self.matched),
            (0, i) if i == self.len() => write!(f, "{i} ignored"),
            (0, i) => write!(f, "{} matched, {i} ignored", self.matched),
            (m, 0) => write!(f, "{m} mismatched"),
            (m, i) => write!(f, "{m} mismatched, {i} ignored"),
        }
    }
}

/// Session-wide verification counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifyTally {
    /// Data bytes processed.
    pub total: usize,
    /// Bytes equal to the expected value.
    pub matched: usize,
    /// Bytes differing from the expected value.
    pub mismatched: usize,
    /// Bytes not compared.
    pub ignored: usize,
}

impl VerifyTally {
    /// Whether no byte mismatched.
    pub fn passed(&self) -> bool {
        self.mismatched == 0
    }

    fn absorb(&mut self, line: &LineReport) {
        self.total += line.len();
        self.matched += line.matched;
        self.mismatched += line.mismatched;
        self.ignored += line.ignored;
    }
}

impl fmt::Display for VerifyTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(f, "PASSED. {} total bytes, {} matched", self.total, self.matched)?;
        } else {
            write!(
                f,
                "FAILED! {} total bytes, {} mismatched",
                self.total, self.mismatched
            )?;
        }
        if self.ignored > 0 {
            write!(f, ", {} ignored", self.ignored)?;
        }
        Ok(())
    }
}

/// 68HC11 flasher over any [`Port`].
pub struct Hc11Flasher<P: Port> {
    port: P,
    config: SessionConfig,
}

#[cfg(feature = "native")]
impl Hc11Flasher<crate::port::NativePort> {
    /// Open the configured serial port at the talker baud rate.
    pub fn open(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let port = crate::port::NativePort::open(&config.serial_config(config.talker_baud))?;
        Ok(Self::new(port, config))
    }
}

impl<P: Port> Hc11Flasher<P> {
    /// Wrap an already open port.
    pub fn new(port: P, config: SessionConfig) -> Self {
        Self { port, config }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the flasher and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Download the talker through the ROM bootloader and switch to the
    /// talker's baud rate.
    ///
    /// The MCU must have been reset into bootstrap mode.
    pub fn upload_talker(&mut self, image: &TalkerImage) -> Result<()> {
        let config = &self.config;
        info!(
            "Uploading talker ({} bytes) at {} baud",
            image.code_len(),
            config.boot_baud.baud()
        );

        self.port
            .set_baud_rate(config.boot_baud.baud())?;
        self.port.clear_buffers()?;
        {
            let mut buffers = TransferBuffers::new(config.tx_chunk, config.rx_chunk);
            let mut io = ChunkedIo::new(&mut self.port, config.tx_chunk, config.rx_chunk);
            bootstrap::download(&mut io, &mut buffers, image)?;
        }

        // Bootloader jumps to the talker; nothing to poll for
        thread::sleep(config.settle_delay);
        self.port
            .set_baud_rate(config.talker_baud)?;
        self.port.clear_buffers()?;
        debug!("Link switched to {} baud", config.talker_baud);

        if config.protocol == TalkerProtocol::Echo {
            debug!("Selecting special test mode");
            Talker::new(&mut self.port, config)
                .write_byte(registers::HPRIO, registers::HPRIO_SPECIAL_TEST)?;
        }

        info!("Talker running");
        Ok(())
    }

    /// Read `region` and stream it to `out` as S-records.
    ///
    /// `on_line` sees every S1 record as it is completed. Returns `out`.
    pub fn read_memory<W, F>(&mut self, region: &MemoryRegion, out: W, mut on_line: F) -> Result<W>
    where
        W: Write,
        F: FnMut(&SRecord),
    {
        let from = region.from();
        let total = region.len();
        info!("Reading {total} bytes from 0x{from:04X}");

        let mut writer = SrecWriter::begin(out, from, self.config.srec_line_len)?;
        let mut talker = Talker::new(&mut self.port, &self.config);
        let block = talker.read_block();

        let mut addr = from;
        let mut remaining = total;
        while remaining > 0 {
            let n = remaining.min(block);
            for &b in talker.read(addr, n)? {
                if let Some(record) = writer.push(b)? {
                    on_line(&record);
                }
            }
            addr = addr.wrapping_add(n as u16);
            remaining -= n;
        }

        let (out, last) = writer.finish()?;
        if let Some(record) = last {
            on_line(&record);
        }
        Ok(out)
    }

    /// Read back every record and compare it with the device.
    pub fn verify_records<F>(&mut self, records: &[SRecord], mut on_line: F) -> Result<VerifyTally>
    where
        F: FnMut(&LineReport),
    {
        let mut tally = VerifyTally::default();
        let mut talker = Talker::new(&mut self.port, &self.config);

        for record in records
            .iter()
            .filter(|r| !r.data.is_empty())
        {
            let mut received = Vec::with_capacity(record.data.len());
            let mut addr = record.address;
            for piece in record
                .data
                .chunks(MAX_COMMAND_BYTES)
            {
                received.extend_from_slice(talker.read(addr, piece.len())?);
                addr = addr.wrapping_add(piece.len() as u16);
            }

            let line = LineReport::compare(&self.config, record.address, &record.data, &received);
            tally.absorb(&line);
            on_line(&line);
        }

        info!("Verify: {tally}");
        Ok(tally)
    }

    /// Write an explicit payload region into `target`.
    ///
    /// The payload goes out in commands of up to 256 bytes; each command is
    /// reported through `on_line`.
    pub fn write_hex<F>(
        &mut self,
        region: &MemoryRegion,
        target: MemoryTarget,
        on_line: F,
    ) -> Result<VerifyTally>
    where
        F: FnMut(&LineReport),
    {
        let MemoryRegion::Bytes { from, data } = region else {
            return Err(Error::Unsupported(
                "a write needs an explicit payload, not an address range".into(),
            ));
        };

        let pieces: Vec<SRecord> = data
            .chunks(MAX_COMMAND_BYTES)
            .enumerate()
            .map(|(i, piece)| {
                let addr = from.wrapping_add((i * MAX_COMMAND_BYTES) as u16);
                SRecord::data_record(addr, piece.to_vec())
            })
            .collect();
        let tally = self.write_lines(&pieces, target, on_line)?;
        info!("Write: {tally}");
        Ok(tally)
    }

    /// Write every record into `target`, one command per record.
    ///
    /// On the echo variant a bad echo aborts with [`Error::EchoMismatch`];
    /// on the opcode variant the talker's readback is compared and tallied.
    /// A RAM write on the echo variant ends by protecting BPROT again.
    pub fn write_records<F>(
        &mut self,
        records: &[SRecord],
        target: MemoryTarget,
        on_line: F,
    ) -> Result<VerifyTally>
    where
        F: FnMut(&LineReport),
    {
        info!("Writing {} records to {target}", records.len());
        let tally = self.write_lines(records, target, on_line)?;

        let mut talker = Talker::new(&mut self.port, &self.config);
        if talker.protocol() == TalkerProtocol::Echo && target == MemoryTarget::Ram {
            talker.write_byte(registers::BPROT, registers::BPROT_PROTECT)?;
        }

        info!("Write: {tally}");
        Ok(tally)
    }

    fn write_lines<F>(
        &mut self,
        records: &[SRecord],
        target: MemoryTarget,
        mut on_line: F,
    ) -> Result<VerifyTally>
    where
        F: FnMut(&LineReport),
    {
        let mut tally = VerifyTally::default();
        let mut talker = Talker::new(&mut self.port, &self.config);

        for record in records
            .iter()
            .filter(|r| !r.data.is_empty())
        {
            let mut received = Vec::with_capacity(record.data.len());
            let mut addr = record.address;
            for piece in record
                .data
                .chunks(MAX_COMMAND_BYTES)
            {
                received.extend_from_slice(talker.write(addr, piece, target)?);
                addr = addr.wrapping_add(piece.len() as u16);
            }

            let line = LineReport::compare(&self.config, record.address, &record.data, &received);
            tally.absorb(&line);
            on_line(&line);
        }
        Ok(tally)
    }

    /// Erase then program every data byte into EEPROM.
    ///
    /// BPROT is cleared for the duration. `on_progress` receives the address
    /// just programmed, bytes done and bytes total. Returns bytes programmed.
    pub fn program_eeprom<F>(&mut self, records: &[SRecord], mut on_progress: F) -> Result<usize>
    where
        F: FnMut(u16, usize, usize),
    {
        let total = data_len(records);
        let delay = self.config.program_delay;
        info!("Programming {total} EEPROM bytes");

        let mut talker = Talker::new(&mut self.port, &self.config);
        talker.write_byte(registers::BPROT, registers::BPROT_UNPROTECT)?;

        let mut done = 0;
        for (addr, value) in bytes_of(records) {
            program::program_eeprom_byte(&mut talker, addr, value, delay)?;
            done += 1;
            on_progress(addr, done, total);
        }

        talker.write_byte(registers::BPROT, registers::BPROT_PROTECT)?;
        info!("EEPROM programming complete");
        Ok(done)
    }

    /// Program every data byte into EPROM through `register`.
    ///
    /// Requires programming voltage on the part. Returns bytes programmed.
    pub fn program_eprom<F>(
        &mut self,
        records: &[SRecord],
        register: EpromRegister,
        mut on_progress: F,
    ) -> Result<usize>
    where
        F: FnMut(u16, usize, usize),
    {
        let total = data_len(records);
        let delay = self.config.program_delay;
        info!("Programming {total} EPROM bytes via {register:?}");

        let mut talker = Talker::new(&mut self.port, &self.config);
        let mut done = 0;
        for (addr, value) in bytes_of(records) {
            program::run(&mut talker, register.operation(), addr, value, delay)?;
            done += 1;
            on_progress(addr, done, total);
        }

        info!("EPROM programming complete");
        Ok(done)
    }

    /// Erase EEPROM. `address` selects the row or byte; bulk erase ignores it.
    pub fn erase_eeprom(&mut self, mode: EraseMode, address: Option<u16>) -> Result<()> {
        let address = match (mode, address) {
            (EraseMode::Bulk, _) => EEPROM_START,
            (_, Some(addr)) => addr,
            (_, None) => {
                return Err(Error::Unsupported(format!(
                    "{mode:?} erase needs an address"
                )));
            },
        };
        info!("{mode:?} erase at 0x{address:04X}");

        let delay = self.config.program_delay;
        let mut talker = Talker::new(&mut self.port, &self.config);
        talker.write_byte(registers::BPROT, registers::BPROT_UNPROTECT)?;
        program::run(&mut talker, mode.operation(), address, ERASE_DUMMY, delay)?;
        talker.write_byte(registers::BPROT, registers::BPROT_PROTECT)
    }
}

fn data_len(records: &[SRecord]) -> usize {
    records
        .iter()
        .map(|r| r.data.len())
        .sum()
}

/// Every `(address, byte)` pair of `records`, in order.
fn bytes_of(records: &[SRecord]) -> impl Iterator<Item = (u16, u8)> + '_ {
    records.iter().flat_map(|r| {
        r.data
            .iter()
            .enumerate()
            .map(move |(i, &b)| (r.address.wrapping_add(i as u16), b))
    })
}
