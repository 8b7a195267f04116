//! Commands that talk to the MCU through the bootstrap talker.
//!
//! Results (hex dumps, per-line reports, PASS/FAIL summaries) go to stdout;
//! status lines and progress go to stderr.

use {
    crate::{CliError, use_fancy_output},
    anyhow::Result,
    console::style,
    hc11flash::{
        EpromRegister, EraseMode, Error, Hc11Flasher, LineReport, MemoryRegion, MemoryTarget,
        Port, SRecord, TalkerImage, VerifyTally, protocol::srec::format_s1,
    },
    indicatif::{ProgressBar, ProgressStyle},
    std::{
        fmt::Write as _,
        fs::File,
        io::{self, BufWriter, Write},
        path::Path,
    },
};

const REMOVE_VPP: &str = "Please remove programming voltage (12V) now before powering off the MCU";

/// Uppercase hex without separators.
pub(crate) fn hex_string(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02X}");
        s
    })
}

/// `AAAA:HEX` line for the memory dump.
pub(crate) fn dump_line(record: &SRecord) -> String {
    format!("{:04X}:{}", record.address, hex_string(&record.data))
}

/// Verification report for one record: the file line, then what came back.
pub(crate) fn verify_lines(report: &LineReport) -> [String; 2] {
    [
        format!("File: {}", format_s1(report.address, &report.expected).trim_end()),
        format!("Rx  :         {} = {report}", hex_string(&report.received)),
    ]
}

/// `AAAA:HEX = report` line for a write.
pub(crate) fn write_line(report: &LineReport) -> String {
    format!("{:04X}:{} = {report}", report.address, hex_string(&report.expected))
}

fn status(quiet: bool, symbol: console::StyledObject<&str>, message: &str) {
    if !quiet {
        eprintln!("{symbol} {message}");
    }
}

fn finish_tally(tally: &VerifyTally) -> Result<()> {
    println!("{tally}");
    if tally.passed() {
        Ok(())
    } else {
        Err(CliError::VerifyFailed(tally.to_string()).into())
    }
}

fn progress_bar(quiet: bool, total: usize) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Download the talker and switch the link to the talker's rate.
pub(crate) fn cmd_upload_talker<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    talker: &Path,
    quiet: bool,
) -> Result<()> {
    let image = TalkerImage::load(talker)?;
    status(
        quiet,
        style("⏳").yellow(),
        &format!(
            "Loading {} ({} bytes) at {} baud",
            talker.display(),
            image.code_len(),
            flasher.config().boot_baud.baud()
        ),
    );
    flasher.upload_talker(&image)?;
    status(quiet, style("✓").green(), "Download completed successfully");
    Ok(())
}

/// Dump a region to stdout, and to an S-record file when `file` is given.
pub(crate) fn cmd_read<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    region: &MemoryRegion,
    file: Option<&Path>,
    quiet: bool,
) -> Result<()> {
    status(quiet, style("📖").cyan(), "Reading memory");
    let print = |record: &SRecord| println!("{}", dump_line(record));

    match file {
        Some(path) => {
            let out = File::create(path).map_err(|source| Error::File {
                path: path.to_path_buf(),
                source,
            })?;
            let mut out = flasher.read_memory(region, BufWriter::new(out), print)?;
            out.flush().map_err(|source| Error::File {
                path: path.to_path_buf(),
                source,
            })?;
        },
        None => {
            flasher.read_memory(region, io::sink(), print)?;
        },
    }

    status(quiet, style("✓").green(), "Read successfully completed");
    Ok(())
}

/// Compare the device against every record.
pub(crate) fn cmd_verify<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    records: &[SRecord],
    quiet: bool,
) -> Result<()> {
    status(quiet, style("🔍").cyan(), "Reading & verifying memory");
    let tally = flasher.verify_records(records, |report| {
        for line in verify_lines(report) {
            println!("{line}");
        }
    })?;
    finish_tally(&tally)
}

fn write_banner(target: MemoryTarget) -> &'static str {
    match target {
        MemoryTarget::Ram => "Writing & verifying normal memory",
        MemoryTarget::Eeprom => "Writing & verifying EEPROM",
        MemoryTarget::Eprom => "Writing & verifying EPROM (non E20)",
        MemoryTarget::EpromE20 => "Writing & verifying EPROM (E20, 12V)",
    }
}

fn remind_vpp(target: MemoryTarget) {
    if matches!(target, MemoryTarget::Eprom | MemoryTarget::EpromE20) {
        eprintln!("{} {REMOVE_VPP}", style("⚠").yellow());
    }
}

/// Write an inline hex payload.
pub(crate) fn cmd_write_hex<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    region: &MemoryRegion,
    target: MemoryTarget,
    quiet: bool,
) -> Result<()> {
    if !matches!(region, MemoryRegion::Bytes { .. }) {
        return Err(CliError::Usage("write-hex needs a hex payload".into()).into());
    }
    status(quiet, style("✏").cyan(), write_banner(target));

    let result = flasher.write_hex(region, target, |report| println!("{}", write_line(report)));
    remind_vpp(target);
    finish_tally(&result?)
}

/// Write every record of a file through the talker's write command.
pub(crate) fn cmd_write_file<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    records: &[SRecord],
    target: MemoryTarget,
    quiet: bool,
) -> Result<()> {
    status(quiet, style("✏").cyan(), write_banner(target));

    let result = flasher.write_records(records, target, |report| println!("{}", write_line(report)));
    remind_vpp(target);
    finish_tally(&result?)
}

/// Program EEPROM or EPROM byte by byte, then verify.
pub(crate) fn cmd_program<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    records: &[SRecord],
    target: MemoryTarget,
    quiet: bool,
) -> Result<()> {
    let total: usize = records.iter().map(|r| r.data.len()).sum();
    let label = match target {
        MemoryTarget::Eeprom => "Programming EEPROM",
        MemoryTarget::Eprom => "Programming EPROM (non E20)",
        MemoryTarget::EpromE20 => "Programming EPROM (E20, 12V)",
        MemoryTarget::Ram => {
            return Err(CliError::Usage("program targets EEPROM or EPROM".into()).into());
        },
    };
    status(quiet, style("⚡").yellow(), label);

    let pb = progress_bar(quiet, total);
    let on_progress = |addr: u16, done: usize, _total: usize| {
        pb.set_message(format!("0x{addr:04X}"));
        pb.set_position(done as u64);
    };
    let programmed = match target {
        MemoryTarget::Eeprom => flasher.program_eeprom(records, on_progress),
        MemoryTarget::EpromE20 => flasher.program_eprom(records, EpromRegister::Eprog, on_progress),
        _ => flasher.program_eprom(records, EpromRegister::Pprog, on_progress),
    };
    pb.finish_and_clear();
    let programmed = match programmed {
        Ok(n) => n,
        Err(e) => {
            remind_vpp(target);
            return Err(e.into());
        },
    };
    status(
        quiet,
        style("✓").green(),
        &format!("Programmed {programmed} bytes"),
    );

    let verified = cmd_verify(flasher, records, quiet);
    remind_vpp(target);
    verified
}

/// Erase EEPROM: the whole array, one row or one byte.
pub(crate) fn cmd_erase_ee<P: Port>(
    flasher: &mut Hc11Flasher<P>,
    mode: EraseMode,
    address: Option<u16>,
    quiet: bool,
) -> Result<()> {
    let what = match (mode, address) {
        (EraseMode::Bulk, _) => "Bulk erasing EEPROM".to_string(),
        (EraseMode::Row, Some(a)) => format!("Erasing EEPROM row at 0x{a:04X}"),
        (EraseMode::Byte, Some(a)) => format!("Erasing EEPROM byte at 0x{a:04X}"),
        (_, None) => format!("{mode:?} erase"),
    };
    status(quiet, style("🗑").red(), &what);
    flasher.erase_eeprom(mode, address)?;
    status(quiet, style("✓").green(), "Erase completed");
    Ok(())
}
