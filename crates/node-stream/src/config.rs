//! hub config

use std::time::Duration;

use error_stack::bail;

use crate::error::CommError;
use crate::error::CommResult;

/// Subscriber hub config.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// max items buffered per subscriber before it gets evicted
    pub queue_capacity: usize,
    /// SSE keep-alive interval
    pub keep_alive: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            keep_alive: Duration::from_secs(15),
        }
    }
}

impl HubConfig {
    /// set per-subscriber queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// set SSE keep-alive interval.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn validate(&self) -> CommResult<()> {
        if self.queue_capacity == 0 {
            bail!(CommError::Configuration {
                message: "subscriber queue capacity must be greater than zero".to_string(),
            });
        }
        if self.keep_alive.is_zero() {
            bail!(CommError::Configuration {
                message: "keep-alive interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
