use std::time::Duration;

use log::{debug, error, info};
use reqwest::Client;

use super::models::{SyncError, SyncPayload, SyncResult, SyncStatus};

/// HTTP client for the remote collector. Failures are reported, never retried.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl CollectorClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST the payload and describe the outcome
    pub async fn post(&self, payload: &SyncPayload) -> SyncStatus {
        match self.try_post(payload).await {
            Ok(code) => SyncStatus::Delivered(code),
            Err(SyncError::Status(code)) => SyncStatus::Rejected(code),
            Err(e) => {
                error!("Sync to {} failed: {}", self.endpoint, e);
                SyncStatus::TransportFailed(e.to_string())
            }
        }
    }

    /// POST the payload; `Ok` carries the 2xx status code
    pub async fn try_post(&self, payload: &SyncPayload) -> SyncResult<u16> {
        debug!(
            "Posting {} results ({} absent) to {}",
            payload.results.len(),
            payload.absent_count(),
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!("Collector rejected sync with status: {}", status);
            return Err(SyncError::Status(status.as_u16()));
        }

        info!("Collector accepted sync: {}", status);
        Ok(status.as_u16())
    }
}
