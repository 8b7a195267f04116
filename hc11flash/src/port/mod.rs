//! Port abstraction for the serial link to the MCU.
//!
//! The protocol engine only sees the `Port` trait; the native implementation
//! on top of the `serialport` crate is selected at build time through the
//! `native` feature.
//!
//! ```text
//! +---------------------------+
//! |  Orchestrators (flasher)  |
//! +-------------+-------------+
//!               |
//! +-------------v-------------+
//! | talker / bootstrap framing|
//! +-------------+-------------+
//!               |
//! +-------------v-------------+
//! |     Chunked I/O engine    |
//! +-------------+-------------+
//!               |
//! +-------------v-------------+
//! |         Port trait        |
//! +-------------+-------------+
//!               |
//! +-------------v-------------+
//! |  NativePort (serialport)  |
//! +---------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use hc11flash::port::Port;
//! use std::io::{Read, Write};
//!
//! fn example<P: Port>(port: &mut P) -> std::io::Result<()> {
//!     port.write_all(&[0xFF])?;
//!
//!     let mut buf = [0u8; 1];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Line settings for opening a port.
///
/// Framing is fixed at 8N1 without flow control: the bootstrap ROM and the
/// talker only speak that, and the SCI has no handshake lines.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_millis(1000),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Serial transport capability used by the protocol engine.
///
/// Raw byte movement goes through `Read`/`Write`; a single `write` or `read`
/// call is one transport transfer and the engine treats short counts as
/// failures rather than retrying.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
