//! Unplanned-restart detection.
//!
//! Each shard keeps the `processStartTime` it saw when the cluster came up.
//! After every recorded step the live value is compared against it; a
//! change means the instance restarted underneath the test. The change is
//! reported once and becomes the new baseline.

use crate::api::{ApiClient, ApiError};
use crate::transport::Transport;

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Same process as before, or no baseline yet.
    Unchanged,
    /// The process start time moved.
    Restarted {
        /// Baseline before the check.
        previous: i64,
        /// Start time now observed.
        current: i64,
    },
}

/// Liveness fingerprint of one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessLiveness {
    baseline: Option<i64>,
}

impl ProcessLiveness {
    /// A tracker with no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known process start time.
    pub fn baseline(&self) -> Option<i64> {
        self.baseline
    }

    /// Set the baseline.
    pub fn reset(&mut self, start_time: i64) {
        self.baseline = Some(start_time);
    }

    /// Compare an observed start time against the baseline, then adopt it.
    pub fn observe(&mut self, current: i64) -> Liveness {
        let previous = self.baseline.replace(current);
        match previous {
            Some(previous) if previous != current => Liveness::Restarted { previous, current },
            _ => Liveness::Unchanged,
        }
    }

    /// Fetch the live start time and record it as the baseline.
    pub async fn record<T: Transport>(&mut self, client: &ApiClient<T>) -> Result<i64, ApiError> {
        let start_time = client.status_process_start_time().await?;
        self.reset(start_time);
        Ok(start_time)
    }

    /// Fetch the live start time and compare it against the baseline.
    pub async fn check<T: Transport>(&mut self, client: &ApiClient<T>) -> Result<Liveness, ApiError> {
        let current = client.status_process_start_time().await?;
        Ok(self.observe(current))
    }
}
