//! Configuration file support for hc11flash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (HC11FLASH_*)
//! 3. Local config file (./hc11flash.toml)
//! 4. Global config file (~/.config/hc11flash/config.toml)

use directories::ProjectDirs;
use hc11flash::{BootBaud, SessionConfig, TalkerProtocol};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
const LOCAL_CONFIG: &str = "hc11flash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Bytes per transport write.
    pub tx_chunk: Option<usize>,
    /// Bytes per transport read.
    pub rx_chunk: Option<usize>,
}

/// Talker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalkerConfig {
    /// Talker S-record file.
    pub file: Option<PathBuf>,
    /// Talker protocol ("opcode" or "echo").
    pub protocol: Option<String>,
    /// Upload at the fast bootloader rate.
    #[serde(default)]
    pub fast: bool,
}

/// Programming configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Bytes per transport write while programming.
    pub chunk: Option<usize>,
    /// Programming voltage hold time in milliseconds.
    pub delay_ms: Option<u64>,
    /// Data bytes per S1 line in memory dumps.
    pub srec_line_len: Option<usize>,
    /// Compare CONFIG during verification.
    #[serde(default)]
    pub verify_config: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Talker settings.
    #[serde(default)]
    pub talker: TalkerConfig,
    /// Programming settings.
    #[serde(default)]
    pub program: ProgramConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "hc11flash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            talker,
            program,
        } = other;

        // Connection config
        if connection.serial.is_some() {
            self.connection.serial = connection.serial;
        }
        if connection.timeout_ms.is_some() {
            self.connection.timeout_ms = connection.timeout_ms;
        }
        if connection.tx_chunk.is_some() {
            self.connection.tx_chunk = connection.tx_chunk;
        }
        if connection.rx_chunk.is_some() {
            self.connection.rx_chunk = connection.rx_chunk;
        }

        // Talker config
        if talker.file.is_some() {
            self.talker.file = talker.file;
        }
        if talker.protocol.is_some() {
            self.talker.protocol = talker.protocol;
        }
        if talker.fast {
            self.talker.fast = true;
        }

        // Program config
        if program.chunk.is_some() {
            self.program.chunk = program.chunk;
        }
        if program.delay_ms.is_some() {
            self.program.delay_ms = program.delay_ms;
        }
        if program.srec_line_len.is_some() {
            self.program.srec_line_len = program.srec_line_len;
        }
        if program.verify_config {
            self.program.verify_config = true;
        }
    }

    /// Talker protocol from the config file, if set and valid.
    pub fn protocol(&self) -> Option<TalkerProtocol> {
        let name = self.talker.protocol.as_deref()?;
        let protocol = TalkerProtocol::from_name(name);
        if protocol.is_none() {
            warn!("Ignoring unknown talker protocol '{name}' in config");
        }
        protocol
    }

    /// Apply file settings on top of library defaults.
    ///
    /// Command-line values are layered on afterwards by the caller.
    pub fn session(&self, port_name: &str) -> SessionConfig {
        let defaults = SessionConfig::new(port_name);
        let tx = self.connection.tx_chunk.unwrap_or(defaults.tx_chunk);
        let rx = self.connection.rx_chunk.unwrap_or(defaults.rx_chunk);

        let mut session = defaults
            .with_chunks(tx, rx)
            .with_verify_config(self.program.verify_config)
            .with_protocol(self.protocol().unwrap_or_default());
        if self.talker.fast {
            session = session.with_boot_baud(BootBaud::Fast);
        }
        if let Some(ms) = self.connection.timeout_ms {
            session = session.with_timeout(Duration::from_millis(ms));
        }
        if let Some(chunk) = self.program.chunk {
            session = session.with_program_chunk(chunk);
        }
        if let Some(ms) = self.program.delay_ms {
            session = session.with_program_delay(Duration::from_millis(ms));
        }
        if let Some(len) = self.program.srec_line_len {
            session = session.with_srec_line_len(len);
        }
        session
    }
}
