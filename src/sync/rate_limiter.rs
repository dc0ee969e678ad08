//! Process-wide spacing of outbound provider calls
//!
//! Every caller shares one [`RateLimiter`], so the provider never sees two
//! admitted calls closer together than `min_interval`, however many workers
//! and jobs are running.

use crate::config::RateLimitConfig;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum gap between consecutive admitted calls
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given minimum spacing
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Create a limiter from configuration
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.min_interval())
    }

    /// Wait until a call may be made, then record it as admitted
    ///
    /// Admission is serialized; execution of the admitted call is not.
    pub async fn acquire(&self) {
        // Held across the sleep: each waiter measures from its predecessor
        let mut last_call = self.last_call.lock().await;

        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Waiting for rate limit");
                tokio::time::sleep(wait).await;
            }
        }

        *last_call = Some(Instant::now());
    }

    /// Configured minimum spacing
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}
