//! Minimum-interval rate gate shared by all outbound HTTP clients.
//!
//! Every provider call awaits the gate before sending, so the pacing
//! policy lives in one injected value instead of sleeps at call sites.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Enforces a minimum interval between successive calls.
///
/// Waiters are serialized: with N concurrent callers the gate spaces
/// their calls `min_interval` apart in arrival order.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// A gate that never waits. Used by tests and offline commands.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until at least `min_interval` has passed since the previous
    /// call, then records this call's slot.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                trace!(wait_ms = wait.as_millis() as u64, "rate gate waiting");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gate_spaces_calls() {
        let gate = RateGate::new(Duration::from_millis(100));

        let start = Instant::now();
        gate.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));

        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(100));

        gate.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_gate_never_waits() {
        let gate = RateGate::unlimited();
        let start = Instant::now();
        for _ in 0..10 {
            gate.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_longer_than_interval_passes_through() {
        let gate = RateGate::new(Duration::from_millis(50));
        gate.acquire().await;

        sleep(Duration::from_millis(200)).await;

        let before = Instant::now();
        gate.acquire().await;
        assert!(before.elapsed() < Duration::from_millis(1));
    }
}
