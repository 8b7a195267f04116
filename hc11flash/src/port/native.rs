//! [`Port`] over the `serialport` crate.
//!
//! Opens the link 8N1 without flow control, which is all the bootstrap ROM
//! and the talker understand.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::trace,
    serialport::{ClearBuffer, SerialPort, SerialPortInfo, SerialPortType},
    std::{
        io::{self, Read, Write},
        time::Duration,
    },
};

/// Serial line to the MCU.
///
/// `close` drops the OS handle; later I/O fails with `NotConnected`.
pub struct NativePort {
    handle: Option<Box<dyn SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
}

impl NativePort {
    /// Open `config.port_name` at `config.baud_rate`.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        trace!(
            "Opening {} at {} baud, timeout {:?}",
            config.port_name, config.baud_rate, config.timeout
        );
        let handle = serialport::new(&config.port_name, config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout)
            .open()?;

        Ok(Self {
            handle: Some(handle),
            name: config.port_name.clone(),
            timeout: config.timeout,
            baud_rate: config.baud_rate,
        })
    }

    fn io_handle(&mut self) -> io::Result<&mut (dyn SerialPort + 'static)> {
        self.handle
            .as_deref_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(handle) = self.handle.as_mut() {
            handle.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        trace!("{}: switching to {baud_rate} baud", self.name);
        self.io_handle()?.set_baud_rate(baud_rate)?;
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.clear(ClearBuffer::All).map_err(Error::Serial),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self.handle.take().is_some() {
            trace!("{}: closed", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io_handle()?.read(buf)
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io_handle()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io_handle()?.flush()
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = Self {
            name: info.port_name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        };
        if let SerialPortType::UsbPort(usb) = info.port_type {
            port.vid = Some(usb.vid);
            port.pid = Some(usb.pid);
            port.manufacturer = usb.manufacturer;
            port.product = usb.product;
            port.serial_number = usb.serial_number;
        }
        port
    }
}

/// Lists the serial devices the OS knows about.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(PortInfo::from)
            .collect())
    }
}
