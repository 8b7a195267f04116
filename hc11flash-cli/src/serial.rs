//! Serial port resolution and confirmation prompts.
//!
//! The port comes from, in order:
//! - `--port` / `HC11FLASH_PORT`
//! - `connection.serial` in the config file
//! - the only detected port
//! - an interactive selection when several ports are present

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    hc11flash::{MemoryTarget, NativePortEnumerator, PortEnumerator, PortInfo},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick the serial port for this invocation.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = NativePortEnumerator::list_ports()?;
    choose_port(ports, options.non_interactive)
}

fn choose_port(ports: Vec<PortInfo>, non_interactive: bool) -> Result<String> {
    match ports.len().cmp(&1) {
        Ordering::Less => Err(usage_err(
            "No serial ports found. Connect the board or pass --port.",
        )),
        Ordering::Equal => {
            let port = ports
                .into_iter()
                .next()
                .ok_or_else(|| usage_err("No serial ports found"))?;
            info!("Auto-selected port: {}", port.name);
            Ok(port.name)
        },
        Ordering::Greater if non_interactive => Err(usage_err(
            "Multiple serial ports found; pass --port in non-interactive mode",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Interactive prompt requires a terminal; use --port or --yes",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Prompt cancelled".to_string()).into()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// One-line description of a port for lists and prompts.
pub(crate) fn describe_port(port: &PortInfo) -> String {
    let vid_pid = match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
        _ => String::new(),
    };
    let product = port
        .product
        .as_deref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();
    format!("{}{vid_pid}{product}", port.name)
}

fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&describe_port(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of the 68HC11 board")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Warning shown before irreversible programming of `target`.
pub(crate) fn programming_notice(target: MemoryTarget) -> Option<&'static str> {
    match target {
        MemoryTarget::Ram => None,
        MemoryTarget::Eeprom => Some(
            "EEPROM PROGRAMMING CONFIRMATION:\n\
             Note, current content will be lost.",
        ),
        MemoryTarget::Eprom | MemoryTarget::EpromE20 => Some(
            "EPROM PROGRAMMING CONFIRMATION:\n\
             Note, programmed zero bits will become permanent. If yes, please apply the\n\
             programming voltage (12V) on the VPPE pin now before continuing.",
        ),
    }
}

/// Ask before programming EEPROM/EPROM.
///
/// `--yes` skips the prompt; non-interactive mode without `--yes` is a usage
/// error. Declining yields [`CliError::Cancelled`].
pub fn confirm_programming(target: MemoryTarget, yes: bool, non_interactive: bool) -> Result<()> {
    let Some(notice) = programming_notice(target) else {
        return Ok(());
    };
    if yes {
        debug!("Programming {target} confirmed by --yes");
        return Ok(());
    }
    if non_interactive {
        return Err(usage_err(&format!(
            "Programming {target} needs confirmation; pass --yes in non-interactive mode"
        )));
    }
    ensure_interactive_terminal()?;

    eprintln!("{}", style(notice).yellow().bold());
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Are you sure you want to write?")
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled(format!("Programming {target} cancelled")).into())
    }
}
