use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding-window crash breaker.
///
/// A burst of `threshold` crashes within `window` trips the breaker; it
/// doesn't time out on its own — it stays tripped until `reset()` or until
/// enough time passes for eviction to drop the in-window count back under
/// `threshold`. Entries exactly at the window boundary (`now - window`) are
/// evicted: the retained range is strictly `> now - window`.
#[derive(Debug)]
pub struct HealthMonitor {
    threshold: u32,
    window: Duration,
    crashes: VecDeque<Instant>,
}

impl HealthMonitor {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            crashes: VecDeque::new(),
        }
    }

    /// Record a crash at `now` and evict anything older than the window.
    pub fn record_crash(&mut self, now: Instant) {
        self.crashes.push_back(now);
        self.evict_expired(now);
    }

    /// Whether a restart is currently permitted, after evicting stale
    /// entries relative to `now`.
    pub fn should_restart(&mut self, now: Instant) -> bool {
        self.evict_expired(now);
        (self.crashes.len() as u32) < self.threshold
    }

    /// Clear the ledger. Called when the supervisor terminates cleanly.
    pub fn reset(&mut self) {
        self.crashes.clear();
    }

    pub fn crash_count(&self) -> usize {
        self.crashes.len()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.crashes.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_restarts_under_threshold() {
        let mut monitor = HealthMonitor::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        monitor.record_crash(t0);
        assert!(monitor.should_restart(t0));
        monitor.record_crash(t0);
        assert!(monitor.should_restart(t0));
    }

    #[test]
    fn trips_at_threshold() {
        let mut monitor = HealthMonitor::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        monitor.record_crash(t0);
        monitor.record_crash(t0);
        monitor.record_crash(t0);
        assert!(!monitor.should_restart(t0));
    }

    #[test]
    fn eviction_drops_expired_crashes() {
        let mut monitor = HealthMonitor::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        monitor.record_crash(t0);
        monitor.record_crash(t0);
        monitor.record_crash(t0);
        assert!(!monitor.should_restart(t0));

        let later = t0 + Duration::from_secs(61);
        assert!(monitor.should_restart(later));
        assert_eq!(monitor.crash_count(), 0);
    }

    #[test]
    fn boundary_tie_break_is_strict_greater_than() {
        let mut monitor = HealthMonitor::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        monitor.record_crash(t0);

        // Exactly at the boundary: `now - window == t0`, so the entry is
        // evicted (strict `>` retained, not `>=`).
        let at_boundary = t0 + Duration::from_secs(60);
        assert!(monitor.should_restart(at_boundary));
        assert_eq!(monitor.crash_count(), 0);
    }

    #[test]
    fn reset_clears_the_ledger() {
        let mut monitor = HealthMonitor::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        monitor.record_crash(t0);
        assert!(!monitor.should_restart(t0));

        monitor.reset();
        assert!(monitor.should_restart(t0));
    }
}
