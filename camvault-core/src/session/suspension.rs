//! Per-device lockout tracking.
//!
//! Cameras lock clients out after repeated rapid authentication
//! failures. The guard mirrors that device-side behavior locally so
//! callers fail fast instead of extending the lockout window with
//! further attempts.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::config::SuspensionConfig;
use crate::models::DeviceId;

#[derive(Debug, Default)]
struct WindowState {
    /// Timestamps of recent authentication failures, oldest first
    failures: VecDeque<Instant>,
    suspended_until: Option<Instant>,
}

/// Tracks authentication failures per device in a sliding window and
/// latches a lockout once the threshold is reached.
///
/// Each device's state sits behind its own lock; one device's
/// bookkeeping never blocks another's.
pub struct SuspensionGuard {
    states: DashMap<DeviceId, Mutex<WindowState>>,
    window: Duration,
    threshold: u32,
    lockout: Duration,
}

impl SuspensionGuard {
    #[must_use]
    pub fn new(config: &SuspensionConfig) -> Self {
        Self {
            states: DashMap::new(),
            window: Duration::from_secs(config.window_seconds),
            threshold: config.failure_threshold,
            lockout: Duration::from_secs(config.lockout_seconds),
        }
    }

    /// Record an authentication rejection.
    ///
    /// Reaching the threshold within the window enters the lockout and
    /// resets the failure counter. `suspended_until` only ever moves
    /// forward while failures continue.
    pub fn record_failure(&self, device_id: &DeviceId) {
        let now = Instant::now();
        let entry = self.states.entry(device_id.clone()).or_default();
        let mut state = entry.lock();

        Self::prune(&mut state.failures, now, self.window);
        state.failures.push_back(now);

        if state.failures.len() as u32 >= self.threshold {
            let until = now + self.lockout;
            state.suspended_until = Some(match state.suspended_until {
                Some(existing) if existing > until => existing,
                _ => until,
            });
            state.failures.clear();
            warn!(
                device = %device_id,
                lockout_secs = self.lockout.as_secs(),
                "device entered suspension after repeated auth failures"
            );
        }
    }

    /// Record a successful authentication.
    ///
    /// Resets the failure counter but does not clear an active lockout:
    /// the lockout is device-enforced, not just a local heuristic.
    pub fn record_success(&self, device_id: &DeviceId) {
        if let Some(entry) = self.states.get(device_id) {
            entry.lock().failures.clear();
        }
    }

    /// Check before any network attempt. Returns the remaining lockout
    /// time when the device is suspended.
    pub fn check(&self, device_id: &DeviceId) -> Result<(), Duration> {
        let Some(entry) = self.states.get(device_id) else {
            return Ok(());
        };
        let mut state = entry.lock();
        match state.suspended_until {
            Some(until) => {
                let now = Instant::now();
                if now < until {
                    Err(until - now)
                } else {
                    state.suspended_until = None;
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    /// Whether the device is currently suspended, with remaining time.
    #[must_use]
    pub fn is_suspended(&self, device_id: &DeviceId) -> Option<Duration> {
        self.check(device_id).err()
    }

    fn prune(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = failures.front() {
            if now.duration_since(front) > window {
                failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn guard() -> SuspensionGuard {
        SuspensionGuard::new(&SuspensionConfig {
            window_seconds: 60,
            failure_threshold: 5,
            lockout_seconds: 1800,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_failures_within_window_suspend() {
        let g = guard();
        let device = DeviceId::from("cam1");

        for _ in 0..4 {
            g.record_failure(&device);
            assert!(g.check(&device).is_ok());
        }
        g.record_failure(&device);

        let remaining = g.is_suspended(&device).expect("should be suspended");
        assert_eq!(remaining.as_secs(), 1800);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_expires_after_lockout() {
        let g = guard();
        let device = DeviceId::from("cam1");

        for _ in 0..5 {
            g.record_failure(&device);
        }
        assert!(g.is_suspended(&device).is_some());

        advance(Duration::from_secs(1799)).await;
        assert!(g.is_suspended(&device).is_some());

        advance(Duration::from_secs(2)).await;
        assert!(g.is_suspended(&device).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_window_do_not_accumulate() {
        let g = guard();
        let device = DeviceId::from("cam1");

        for _ in 0..4 {
            g.record_failure(&device);
        }
        // Window slides past the first four failures
        advance(Duration::from_secs(61)).await;
        g.record_failure(&device);

        assert!(g.is_suspended(&device).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter_but_not_lockout() {
        let g = guard();
        let device = DeviceId::from("cam1");

        for _ in 0..4 {
            g.record_failure(&device);
        }
        g.record_success(&device);
        g.record_failure(&device);
        assert!(g.is_suspended(&device).is_none());

        for _ in 0..4 {
            g.record_failure(&device);
        }
        assert!(g.is_suspended(&device).is_some());

        // A success during an active lockout does not lift it
        g.record_success(&device);
        assert!(g.is_suspended(&device).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_devices_are_isolated() {
        let g = guard();
        let locked = DeviceId::from("cam1");
        let healthy = DeviceId::from("cam2");

        for _ in 0..5 {
            g.record_failure(&locked);
        }
        assert!(g.is_suspended(&locked).is_some());
        assert!(g.is_suspended(&healthy).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continued_failures_extend_suspension() {
        let g = guard();
        let device = DeviceId::from("cam1");

        for _ in 0..5 {
            g.record_failure(&device);
        }
        let first = g.is_suspended(&device).expect("suspended");

        advance(Duration::from_secs(600)).await;
        // Failures keep arriving (e.g. the device itself rejecting);
        // suspended_until never moves backwards.
        for _ in 0..5 {
            g.record_failure(&device);
        }
        let second = g.is_suspended(&device).expect("still suspended");
        assert!(second > first - Duration::from_secs(600));
    }
}
