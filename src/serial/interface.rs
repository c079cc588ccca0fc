use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tokio::time::{sleep, timeout};

use super::{Result, SerialError};

/// How long to sleep between `bytes_to_read` polls while waiting for input
const READ_POLL_MS: u64 = 10;

/// Byte-level access to one serial channel.
///
/// Implemented by [`SerialInterface`] for real ports; tests and alternate
/// transports provide their own implementation.
#[async_trait::async_trait]
pub trait SerialPortIO: Send {
    /// Discard anything the device sent before the next request
    async fn clear_input(&mut self) -> Result<()>;

    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;

    /// Read whatever is available, waiting at most `timeout_ms` for the first byte.
    /// Returns `SerialError::Timeout` if nothing arrived.
    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize>;

    async fn flush(&mut self) -> Result<()>;
}

pub struct SerialInterface {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
}

impl SerialInterface {
    /// Open `port_name` at `baud_rate`. Failure is reported once and never retried here.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => SerialError::PortNotFound(port_name.to_string()),
                serialport::ErrorKind::Io(ErrorKind::NotFound) => {
                    SerialError::PortNotFound(port_name.to_string())
                }
                _ => SerialError::ConnectionFailed(format!("{}: {}", port_name, e)),
            })?;

        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed serial port {}", self.port_name);
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(SerialError::NotConnected)
    }
}

#[async_trait::async_trait]
impl SerialPortIO for SerialInterface {
    async fn clear_input(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port_mut()?;
        let bytes_written = port.write(data).map_err(SerialError::IoError)?;
        port.flush().map_err(SerialError::IoError)?;
        Ok(bytes_written)
    }

    async fn read_data(&mut self, buffer: &mut [u8], timeout_ms: u64) -> Result<usize> {
        let port = self.port_mut()?;

        // Only call read() once bytes are pending so the runtime thread never parks on the port
        let read_operation = async {
            loop {
                match port.bytes_to_read() {
                    Ok(0) => sleep(Duration::from_millis(READ_POLL_MS)).await,
                    Ok(_) => match port.read(buffer) {
                        Ok(0) => sleep(Duration::from_millis(READ_POLL_MS)).await,
                        Ok(bytes_read) => return Ok(bytes_read),
                        Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
                        Err(e) => return Err(SerialError::IoError(e)),
                    },
                    Err(e) => return Err(SerialError::SerialportError(e)),
                }
            }
        };

        timeout(Duration::from_millis(timeout_ms), read_operation)
            .await
            .map_err(|_| SerialError::Timeout)?
    }

    async fn flush(&mut self) -> Result<()> {
        self.port_mut()?.flush()?;
        Ok(())
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}
