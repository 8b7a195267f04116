//! hc11flash CLI - read and program 68HC11 microcontrollers in bootstrap mode.
//!
//! ## Features
//!
//! - Upload a talker through the bootstrap ROM
//! - Dump memory to the terminal and to S-record files
//! - Verify memory against S-record files
//! - Write RAM/registers, EEPROM and EPROM
//! - Erase EEPROM (bulk, row, byte)
//! - Interactive serial port selection and programming confirmation
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use hc11flash::{
    BootBaud, ChecksumPolicy, EraseMode, Hc11Flasher, MemoryRegion, MemoryTarget, NativePort,
    SRecord, SessionConfig, SrecImage, TalkerProtocol,
};
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod serial;

use commands::{completions, device, info};
use config::Config;
use serial::{SerialOptions, confirm_programming, select_serial_port};

/// Default talker file, looked up in the working directory.
const DEFAULT_TALKER: &str = "talker.s19";

/// CLI-level failures that carry their own exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an unanswerable prompt.
    #[error("{0}")]
    Usage(String),
    /// The user declined or interrupted a prompt.
    #[error("{0}")]
    Cancelled(String),
    /// Verification finished with mismatches.
    #[error("Verification failed: {0}")]
    VerifyFailed(String),
}

impl CliError {
    /// Process exit code for this failure.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::VerifyFailed(_) => 5,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error chain to a process exit code.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CliError>() {
            return e.exit_code();
        }
        if let Some(e) = cause.downcast_ref::<hc11flash::Error>() {
            return e.exit_code();
        }
    }
    1
}

/// hc11flash - read and program 68HC11 microcontrollers through the bootstrap ROM.
///
/// Environment variables:
///   HC11FLASH_PORT              - Default serial port
///   HC11FLASH_TIMEOUT           - Read timeout in milliseconds
///   HC11FLASH_PROTOCOL          - Talker protocol (opcode, echo)
///   HC11FLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "hc11flash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(
    after_help = "Examples:\n  hc11flash -p /dev/ttyUSB0 upload-talker --fast\n  hc11flash -p /dev/ttyUSB0 read --from 0xB600 --to 0xB7FF --file ee.s19\n  hc11flash -p /dev/ttyUSB0 program --file app.s19 --target eeprom"
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "HC11FLASH_PORT")]
    port: Option<String>,

    /// Read timeout in milliseconds.
    #[arg(long, global = true, env = "HC11FLASH_TIMEOUT", value_parser = parse_u32)]
    timeout: Option<u32>,

    /// Talker protocol of the uploaded talker.
    #[arg(long, global = true, value_enum, env = "HC11FLASH_PROTOCOL")]
    protocol: Option<ProtocolArg>,

    /// Include the CONFIG register in verification.
    #[arg(long, global = true)]
    verify_config: bool,

    /// Reject S-record lines whose checksum does not match.
    #[arg(long, global = true)]
    strict_checksums: bool,

    /// Answer yes to programming confirmations.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "HC11FLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Talker protocol variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProtocolArg {
    /// One write opcode per memory technology, readback compared by the host.
    Opcode,
    /// Single echoing write opcode; programming driven by the host.
    Echo,
}

impl From<ProtocolArg> for TalkerProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Opcode => TalkerProtocol::Opcode,
            ProtocolArg::Echo => TalkerProtocol::Echo,
        }
    }
}

/// Memory targets for talker writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    /// RAM, registers and other directly writable memory.
    Ram,
    /// On-chip EEPROM.
    Eeprom,
    /// EPROM through PPROG.
    Eprom,
    /// EPROM through EPROG (MC68HC711E20).
    EpromE20,
}

impl From<TargetArg> for MemoryTarget {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Ram => MemoryTarget::Ram,
            TargetArg::Eeprom => MemoryTarget::Eeprom,
            TargetArg::Eprom => MemoryTarget::Eprom,
            TargetArg::EpromE20 => MemoryTarget::EpromE20,
        }
    }
}

/// Memory targets for host-driven programming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProgramTarget {
    /// On-chip EEPROM (erase then program each byte).
    Eeprom,
    /// EPROM through PPROG.
    Eprom,
    /// EPROM through EPROG (MC68HC711E20).
    EpromE20,
}

impl From<ProgramTarget> for MemoryTarget {
    fn from(arg: ProgramTarget) -> Self {
        match arg {
            ProgramTarget::Eeprom => MemoryTarget::Eeprom,
            ProgramTarget::Eprom => MemoryTarget::Eprom,
            ProgramTarget::EpromE20 => MemoryTarget::EpromE20,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download the talker through the bootstrap ROM.
    UploadTalker {
        /// Use the fast bootloader rate (7618 baud) instead of 1200 baud.
        #[arg(long)]
        fast: bool,

        /// Talker S-record file.
        #[arg(long, value_name = "PATH")]
        talker: Option<PathBuf>,
    },

    /// Dump memory as hex, optionally into an S-record file.
    Read {
        /// First address.
        #[arg(long, value_parser = parse_u16)]
        from: u16,

        /// Last address (inclusive).
        #[arg(long, value_parser = parse_u16)]
        to: u16,

        /// S-record output file.
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,

        /// Data bytes per S1 line (1-252).
        #[arg(long, value_parser = parse_u8, value_name = "BYTES")]
        line_len: Option<u8>,
    },

    /// Compare memory with an S-record file.
    Verify {
        /// S-record file.
        #[arg(long, value_name = "PATH")]
        file: PathBuf,
    },

    /// Write a hex string at an address.
    WriteHex {
        /// First address.
        #[arg(long, value_parser = parse_u16)]
        from: u16,

        /// Payload as hex digits (odd counts get a leading zero).
        #[arg(long)]
        hex: String,

        /// Memory to write.
        #[arg(long, value_enum, default_value_t = TargetArg::Ram)]
        target: TargetArg,
    },

    /// Write an S-record file with the talker's write command.
    Write {
        /// S-record file.
        #[arg(long, value_name = "PATH")]
        file: PathBuf,

        /// Memory to write.
        #[arg(long, value_enum, default_value_t = TargetArg::Ram)]
        target: TargetArg,
    },

    /// Program EEPROM or EPROM byte by byte from an S-record file, then verify.
    Program {
        /// S-record file.
        #[arg(long, value_name = "PATH")]
        file: PathBuf,

        /// Memory to program.
        #[arg(long, value_enum)]
        target: ProgramTarget,
    },

    /// Erase EEPROM.
    #[command(group(ArgGroup::new("mode").required(true).args(["bulk", "row", "byte"])))]
    EraseEe {
        /// Erase the whole array.
        #[arg(long)]
        bulk: bool,

        /// Erase the row containing this address.
        #[arg(long, value_parser = parse_u16, value_name = "ADDR")]
        row: Option<u16>,

        /// Erase the byte at this address.
        #[arg(long, value_parser = parse_u16, value_name = "ADDR")]
        byte: Option<u16>,
    },

    /// Show information about an S-record file.
    Info {
        /// S-record file.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Split an optional `0x`/`0X` prefix off a number.
fn radix_of(s: &str) -> (&str, u32) {
    let s = s.trim();
    match s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (s, 10),
    }
}

/// Parse an 8-bit value, decimal or `0x` hex.
fn parse_u8(s: &str) -> Result<u8, String> {
    let (digits, radix) = radix_of(s);
    u8::from_str_radix(digits, radix).map_err(|e| format!("Invalid 8-bit value '{s}': {e}"))
}

/// Parse a 16-bit value (addresses), decimal or `0x` hex.
fn parse_u16(s: &str) -> Result<u16, String> {
    let (digits, radix) = radix_of(s);
    u16::from_str_radix(digits, radix).map_err(|e| format!("Invalid 16-bit value '{s}': {e}"))
}

/// Parse a 32-bit value, decimal or `0x` hex.
fn parse_u32(s: &str) -> Result<u32, String> {
    let (digits, radix) = radix_of(s);
    u32::from_str_radix(digits, radix).map_err(|e| format!("Invalid 32-bit value '{s}': {e}"))
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "hc11flash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            let code = exit_code_for(&err);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::UploadTalker { fast, talker } => {
            let talker = talker
                .clone()
                .or_else(|| config.talker.file.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TALKER));
            let mut flasher = open_flasher(cli, &config, |s| {
                if *fast {
                    s.with_boot_baud(BootBaud::Fast)
                } else {
                    s
                }
            })?;
            device::cmd_upload_talker(&mut flasher, &talker, cli.quiet)
        },
        Commands::Read {
            from,
            to,
            file,
            line_len,
        } => {
            let region = MemoryRegion::range(*from, *to)?;
            let mut flasher = open_flasher(cli, &config, |s| match line_len {
                Some(len) => s.with_srec_line_len(usize::from(*len)),
                None => s,
            })?;
            device::cmd_read(&mut flasher, &region, file.as_deref(), cli.quiet)
        },
        Commands::Verify { file } => {
            let records = load_records(cli, file)?;
            let mut flasher = open_flasher(cli, &config, |s| s)?;
            device::cmd_verify(&mut flasher, &records, cli.quiet)
        },
        Commands::WriteHex { from, hex, target } => {
            let region = MemoryRegion::from_hex(*from, hex)?;
            let target = MemoryTarget::from(*target);
            confirm_programming(target, cli.yes, cli.non_interactive)?;
            let mut flasher = open_flasher(cli, &config, |s| s)?;
            device::cmd_write_hex(&mut flasher, &region, target, cli.quiet)
        },
        Commands::Write { file, target } => {
            let records = load_records(cli, file)?;
            let target = MemoryTarget::from(*target);
            confirm_programming(target, cli.yes, cli.non_interactive)?;
            let mut flasher = open_flasher(cli, &config, |s| s)?;
            device::cmd_write_file(&mut flasher, &records, target, cli.quiet)
        },
        Commands::Program { file, target } => {
            let records = load_records(cli, file)?;
            let target = MemoryTarget::from(*target);
            confirm_programming(target, cli.yes, cli.non_interactive)?;
            let mut flasher = open_flasher(cli, &config, |s| s)?;
            device::cmd_program(&mut flasher, &records, target, cli.quiet)
        },
        Commands::EraseEe { row, byte, .. } => {
            let (mode, address) = match (row, byte) {
                (Some(addr), _) => (EraseMode::Row, Some(*addr)),
                (_, Some(addr)) => (EraseMode::Byte, Some(*addr)),
                _ => (EraseMode::Bulk, None),
            };
            confirm_programming(MemoryTarget::Eeprom, cli.yes, cli.non_interactive)?;
            let mut flasher = open_flasher(cli, &config, |s| s)?;
            device::cmd_erase_ee(&mut flasher, mode, address, cli.quiet)
        },
        Commands::Info { file, json } => info::cmd_info(file, *json),
        Commands::ListPorts { json } => info::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Load the data records of an S-record file.
fn load_records(cli: &Cli, path: &Path) -> Result<Vec<SRecord>> {
    let policy = if cli.strict_checksums {
        ChecksumPolicy::Strict
    } else {
        ChecksumPolicy::Lenient
    };
    let image = SrecImage::from_file_checked(path, policy)
        .with_context(|| format!("Failed to load S-record file {}", path.display()))?;
    Ok(image.records)
}

/// Session settings: config file first, then flags and environment.
fn session_config(cli: &Cli, config: &Config, port: &str) -> SessionConfig {
    let mut session = config.session(port);
    if let Some(ms) = cli.timeout {
        session = session.with_timeout(Duration::from_millis(u64::from(ms)));
    }
    if let Some(protocol) = cli.protocol {
        session = session.with_protocol(protocol.into());
    }
    if cli.verify_config {
        session = session.with_verify_config(true);
    }
    session
}

/// Resolve the port and open it at the talker's rate.
fn open_flasher(
    cli: &Cli,
    config: &Config,
    adjust: impl FnOnce(SessionConfig) -> SessionConfig,
) -> Result<Hc11Flasher<NativePort>> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    let port = select_serial_port(&options, config)?;
    let session = adjust(session_config(cli, config, &port));

    if !cli.quiet {
        eprintln!(
            "{} Using port {} ({} talker)",
            style("🔌").cyan(),
            style(&port).cyan(),
            session.protocol
        );
    }

    Hc11Flasher::open(session).with_context(|| format!("Failed to open serial port {port}"))
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_read() {
        let cli = Cli::try_parse_from([
            "hc11flash",
            "--port",
            "/dev/ttyUSB0",
            "read",
            "--from",
            "0xB600",
            "--to",
            "0xB7FF",
            "--file",
            "ee.s19",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        if let Commands::Read {
            from,
            to,
            file,
            line_len,
        } = cli.command
        {
            assert_eq!(from, 0xB600);
            assert_eq!(to, 0xB7FF);
            assert_eq!(file, Some(PathBuf::from("ee.s19")));
            assert_eq!(line_len, None);
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_cli_parse_upload_talker() {
        let cli = Cli::try_parse_from(["hc11flash", "upload-talker", "--fast"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::UploadTalker {
                fast: true,
                talker: None
            }
        ));
    }

    #[test]
    fn test_cli_parse_write_hex_defaults_to_ram() {
        let cli = Cli::try_parse_from(["hc11flash", "write-hex", "--from", "16", "--hex", "AB"])
            .unwrap();
        if let Commands::WriteHex { from, hex, target } = cli.command {
            assert_eq!(from, 16);
            assert_eq!(hex, "AB");
            assert_eq!(target, TargetArg::Ram);
        } else {
            panic!("Expected WriteHex command");
        }
    }

    #[test]
    fn test_cli_parse_program_targets() {
        let cli = Cli::try_parse_from([
            "hc11flash",
            "program",
            "--file",
            "a.s19",
            "--target",
            "eprom-e20",
        ])
        .unwrap();
        if let Commands::Program { target, .. } = cli.command {
            assert_eq!(MemoryTarget::from(target), MemoryTarget::EpromE20);
        } else {
            panic!("Expected Program command");
        }

        assert!(
            Cli::try_parse_from(["hc11flash", "program", "--file", "a.s19", "--target", "ram"])
                .is_err()
        );
    }

    #[test]
    fn test_cli_erase_needs_exactly_one_mode() {
        assert!(Cli::try_parse_from(["hc11flash", "erase-ee"]).is_err());
        assert!(
            Cli::try_parse_from(["hc11flash", "erase-ee", "--bulk", "--row", "0xB600"]).is_err()
        );
        let cli = Cli::try_parse_from(["hc11flash", "erase-ee", "--byte", "0xB610"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::EraseEe {
                byte: Some(0xB610),
                ..
            }
        ));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "hc11flash",
            "verify",
            "--file",
            "a.s19",
            "--protocol",
            "echo",
            "--timeout",
            "0x7D0",
            "--verify-config",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.protocol, Some(ProtocolArg::Echo));
        assert_eq!(cli.timeout, Some(2000));
        assert!(cli.verify_config);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_rejects_bad_address() {
        let too_big = ["hc11flash", "read", "--from", "0x10000", "--to", "1"];
        assert!(Cli::try_parse_from(too_big).is_err());
        let fractional = ["hc11flash", "read", "--from", "1.5", "--to", "2"];
        assert!(Cli::try_parse_from(fractional).is_err());
    }

    #[test]
    fn test_cli_parse_line_len() {
        let args = ["hc11flash", "read", "--from", "0", "--to", "0x3F", "--line-len", "0x20"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Read {
                line_len: Some(32),
                ..
            }
        ));
        let args = ["hc11flash", "read", "--from", "0", "--to", "1", "--line-len", "300"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    // ---- numeric parsing ----

    #[test]
    fn test_parse_u8() {
        assert_eq!(parse_u8("255"), Ok(255));
        assert_eq!(parse_u8("0x1F"), Ok(0x1F));
        assert!(parse_u8("256").is_err());
        assert!(parse_u8("-1").is_err());
    }

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("0xB600"), Ok(0xB600));
        assert_eq!(parse_u16("0XFFFF"), Ok(0xFFFF));
        assert_eq!(parse_u16(" 4096 "), Ok(4096));
        assert!(parse_u16("0x").is_err());
        assert!(parse_u16("1e3").is_err());
    }

    #[test]
    fn test_parse_u32() {
        assert_eq!(parse_u32("1000"), Ok(1000));
        assert_eq!(parse_u32("0xFFFFFFFF"), Ok(u32::MAX));
        assert!(parse_u32("2.5").is_err());
    }

    // ---- session layering ----

    #[test]
    fn test_session_config_flags_override_file() {
        let mut config = Config::default();
        config.connection.timeout_ms = Some(500);
        config.talker.protocol = Some("opcode".to_string());

        let cli = Cli::try_parse_from([
            "hc11flash",
            "--timeout",
            "250",
            "--protocol",
            "echo",
            "list-ports",
        ])
        .unwrap();
        let session = session_config(&cli, &config, "/dev/ttyUSB0");
        assert_eq!(session.timeout, Duration::from_millis(250));
        assert_eq!(session.protocol, TalkerProtocol::Echo);
        assert_eq!(session.port_name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_session_config_keeps_file_values() {
        let mut config = Config::default();
        config.connection.timeout_ms = Some(500);
        config.program.verify_config = true;

        let cli = Cli::try_parse_from(["hc11flash", "list-ports"]).unwrap();
        let session = session_config(&cli, &config, "COM3");
        assert_eq!(session.timeout, Duration::from_millis(500));
        assert!(session.verify_config);
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_codes_from_cli_errors() {
        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        assert_eq!(exit_code_for(&usage), 2);
        let cancelled: anyhow::Error = CliError::Cancelled("no".into()).into();
        assert_eq!(exit_code_for(&cancelled), 130);
        let failed: anyhow::Error = CliError::VerifyFailed("FAILED!".into()).into();
        assert_eq!(exit_code_for(&failed), 5);
    }

    #[test]
    fn test_exit_codes_from_library_errors_through_context() {
        let err = anyhow::Error::from(hc11flash::Error::InvalidHex("zz".into()))
            .context("Failed to write");
        assert_eq!(exit_code_for(&err), 14);

        let err = anyhow::Error::from(hc11flash::Error::ImageTooLarge { max: 256 });
        assert_eq!(exit_code_for(&err), 12);
    }

    #[test]
    fn test_exit_code_defaults_to_one() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&err), 1);
    }
}
