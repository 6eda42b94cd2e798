//! This module contains the [ConnectLimiter] struct.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// [ConnectLimiter] spaces out dial attempts of one transport.
/// Two consecutive calls to [ConnectLimiter::wait] return at least `interval` apart.
pub struct ConnectLimiter {
    interval: Duration,
    next: Mutex<Option<Instant>>,
}

impl ConnectLimiter {
    /// Create a limiter. A zero interval disables limiting.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Mutex::new(None),
        }
    }

    /// The configured minimum interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next dial slot and wait until it comes.
    /// The lock is not held while sleeping.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let at = {
            let mut next = self.next.lock().await;
            let now = Instant::now();
            let at = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(at + self.interval);
            at
        };
        if at > Instant::now() {
            tracing::debug!("dial throttled for {:?}", at - Instant::now());
            tokio::time::sleep_until(at).await;
        }
    }
}
