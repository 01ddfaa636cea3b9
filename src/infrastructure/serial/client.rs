use crate::core::board::LinkOpener;
use crate::core::transport::Link;
use crate::domain::{config::BoardConfig, error::BoardResult};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// [`Link`] over a serial port (USB CDC or UART).
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    device: String,
}

impl SerialLink {
    /// Open `config.device` as 8N1 without flow control.
    pub fn open(config: &BoardConfig) -> BoardResult<Self> {
        let port = serialport::new(&config.device, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout())
            .open()?;

        info!("Opened serial port {} at {} baud", config.device, config.baud_rate);

        Ok(Self {
            port,
            device: config.device.clone(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Link for SerialLink {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let pending = self.port.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending as usize)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        debug!("Closing serial port {}", self.device);
    }
}

/// Default [`LinkOpener`]: opens the configured device as a [`SerialLink`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl LinkOpener for SerialOpener {
    fn open_link(&self, config: &BoardConfig) -> BoardResult<Box<dyn Link>> {
        Ok(Box::new(SerialLink::open(config)?))
    }
}

/// USB serial number of the port at `device`, if it is a USB port and
/// reports one.
///
/// Symlinks such as `/dev/serial/by-id/...` are resolved before matching.
pub fn find_serial_number(device: &str) -> BoardResult<Option<String>> {
    let resolved = std::fs::canonicalize(Path::new(device))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| device.to_string());

    let ports = serialport::available_ports()?;
    let serial_number = ports
        .into_iter()
        .find(|port| port.port_name == device || port.port_name == resolved)
        .and_then(|port| match port.port_type {
            SerialPortType::UsbPort(usb) => usb.serial_number,
            _ => None,
        });

    Ok(serial_number)
}

/// List serial devices present on the host.
pub fn available_devices() -> BoardResult<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|port| port.port_name)
        .collect())
}
