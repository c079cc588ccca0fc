pub mod models;
pub mod service;

pub use models::{SyncError, SyncPayload, SyncResult, SyncStatus};
pub use service::CollectorClient;
