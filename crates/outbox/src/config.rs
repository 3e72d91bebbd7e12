//! Publisher configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OutboxError, Result};

/// Tunables shared by every publisher worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Failed attempts (and causal deferrals) before a message is dead-lettered.
    pub max_retries: u32,
    /// Delay after the first failure.
    pub backoff_base: Duration,
    /// Upper bound on any single delay.
    pub backoff_cap: Duration,
    /// Candidates fetched per tick.
    pub batch_size: usize,
    /// Wait between ticks when the previous batch was not full.
    pub poll_interval: Duration,
    /// How long a claim holds before another worker may take it over.
    pub claim_timeout: Duration,
    /// Routing key overrides by payload type name.
    pub routing_keys: HashMap<String, String>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(60),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            claim_timeout: Duration::from_secs(300),
            routing_keys: HashMap::new(),
        }
    }
}

impl OutboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    /// Publishes messages of `data_type` under `routing_key`.
    pub fn with_routing_key(
        mut self,
        data_type: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.routing_keys.insert(data_type.into(), routing_key.into());
        self
    }

    /// Rejects settings the publisher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(OutboxError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(OutboxError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.claim_timeout.is_zero() {
            return Err(OutboxError::InvalidConfig(
                "claim_timeout must be greater than zero".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(OutboxError::InvalidConfig(format!(
                "backoff_base {:?} exceeds backoff_cap {:?}",
                self.backoff_base, self.backoff_cap
            )));
        }
        if let Some((data_type, _)) = self.routing_keys.iter().find(|(_, key)| key.trim().is_empty())
        {
            return Err(OutboxError::InvalidConfig(format!(
                "blank routing key for {data_type}"
            )));
        }
        Ok(())
    }
}
