use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health status of a pool
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    #[default]
    Success,
    Error,
}

/// Health state of a provider: status, reason and when it was recorded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderState {
    pub status: Status,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderState {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Time elapsed since the state was recorded
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or_default()
    }

    /// An ERROR state older than the flap interval is due for a re-test
    pub fn is_retest_due(&self, flap_interval: Duration) -> bool {
        self.status == Status::Error && self.age() > flap_interval
    }
}

impl Default for ProviderState {
    fn default() -> Self {
        Self::success()
    }
}
