pub mod interface;
pub mod parser;
pub mod protocol;

pub use interface::{SerialInterface, SerialPortIO};
pub use protocol::{DeviceLink, LinkTimeouts, ProbeOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("Parse error: {message}")]
    Parse { message: String, raw: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
