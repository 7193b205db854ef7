//! Engine timing and concurrency settings

use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::scheduler::Lane;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Tick period of the lane executing `pending` stands
    pub pending_period: Duration,
    /// Tick period of the lane provisioning `created` stands
    pub created_period: Duration,
    /// Stands executed concurrently within one `pending` tick
    pub pending_concurrency: usize,
    /// Stands provisioned concurrently within one `created` tick
    pub created_concurrency: usize,
    /// Wait between two status polls of the same job
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pending_period: Duration::from_secs(10),
            created_period: Duration::from_secs(15),
            pending_concurrency: 1,
            created_concurrency: 1,
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn with_periods(mut self, pending: Duration, created: Duration) -> Self {
        self.pending_period = pending;
        self.created_period = created;
        self
    }

    pub fn with_concurrency(mut self, pending: usize, created: usize) -> Self {
        self.pending_concurrency = pending;
        self.created_concurrency = created;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn period(&self, lane: Lane) -> Duration {
        match lane {
            Lane::Pending => self.pending_period,
            Lane::Created => self.created_period,
        }
    }

    pub fn concurrency(&self, lane: Lane) -> usize {
        match lane {
            Lane::Pending => self.pending_concurrency,
            Lane::Created => self.created_concurrency,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let zero_durations = [
            ("pending_period", self.pending_period),
            ("created_period", self.created_period),
            ("poll_interval", self.poll_interval),
        ];
        if let Some((name, _)) = zero_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(EngineError::Config(format!("{name} must be positive")));
        }
        if self.pending_concurrency == 0 || self.created_concurrency == 0 {
            return Err(EngineError::Config(
                "lane concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
