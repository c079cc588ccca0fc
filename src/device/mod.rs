pub mod manager;
pub mod models;
pub mod worker;

pub use manager::{CheckReport, DeviceCheck, DeviceManager, OrchestratorConfig, SyncReport};
pub use models::*;
pub use worker::{DeviceWorker, WorkerConfig, NOT_RUN, NOT_SENT};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device not connected")]
    NotConnected,

    #[error("Invalid device configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
