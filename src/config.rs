// Runtime configuration

use serde::{Deserialize, Serialize};

/// Tunables for a [`SagaMiddleware`](crate::SagaMiddleware) and every task it drives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Log every executed effect at `debug` instead of `trace`.
    pub log_effects: bool,

    /// Maximum number of consecutive steps a task may take without suspending.
    /// A task that exceeds it settles with `SagaError::StepLimit`.
    /// `None` leaves tasks unbounded.
    pub max_sync_steps: Option<usize>,
}

impl RuntimeConfig {
    pub fn with_log_effects(mut self, enabled: bool) -> Self {
        self.log_effects = enabled;
        self
    }

    pub fn with_max_sync_steps(mut self, limit: usize) -> Self {
        self.max_sync_steps = Some(limit);
        self
    }
}
