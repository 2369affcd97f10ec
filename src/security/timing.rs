//! Timing attack protection for credential checks
//!
//! Login and activation pad every attempt to a minimum duration, so an
//! unknown email and a wrong password cannot be told apart by latency.

use std::time::{Duration, Instant};

use crate::constants::AUTH_MIN_DURATION_MS;

/// Sleeps until `min_duration` has passed since `start_time`
pub async fn add_auth_delay(start_time: Instant, min_duration: Duration) {
    let elapsed = start_time.elapsed();
    if elapsed < min_duration {
        tokio::time::sleep(min_duration - elapsed).await;
    }
}

/// Authentication timing helper
#[derive(Debug)]
pub struct AuthTimer {
    start: Instant,
    min_duration: Duration,
}

impl AuthTimer {
    /// Starts a timer that will not finish before `min_duration`
    pub fn new(min_duration: Duration) -> Self {
        Self {
            start: Instant::now(),
            min_duration,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Wait until minimum duration has elapsed
    pub async fn wait(self) {
        add_auth_delay(self.start, self.min_duration).await;
    }
}

impl Default for AuthTimer {
    fn default() -> Self {
        Self::new(Duration::from_millis(AUTH_MIN_DURATION_MS))
    }
}
