use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinator-wide observability counters.
///
/// These are ambient — the spec this service implements doesn't mandate a
/// metrics surface, but every component that can drop work (backpressure
/// eviction, crash restarts, malformed-FLV resync) counts it so an operator
/// can tell the difference between "quiet" and "silently failing".
#[derive(Debug, Default)]
pub struct Telemetry {
    viewers_evicted_backpressure: AtomicU64,
    bytes_forwarded: AtomicU64,
    chunks_forwarded: AtomicU64,
    encoder_restarts: AtomicU64,
    encoder_start_failures: AtomicU64,
    flv_resyncs: AtomicU64,
}

impl Telemetry {
    pub fn inc_viewer_evicted_backpressure(&self) {
        self.viewers_evicted_backpressure
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_forwarded(&self, n: u64) {
        self.bytes_forwarded.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_chunks_forwarded(&self) {
        self.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_encoder_restart(&self) {
        self.encoder_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_encoder_start_failure(&self) {
        self.encoder_start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flv_resync(&self) {
        self.flv_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            viewers_evicted_backpressure: self.viewers_evicted_backpressure.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
            encoder_restarts: self.encoder_restarts.load(Ordering::Relaxed),
            encoder_start_failures: self.encoder_start_failures.load(Ordering::Relaxed),
            flv_resyncs: self.flv_resyncs.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub viewers_evicted_backpressure: u64,
    pub bytes_forwarded: u64,
    pub chunks_forwarded: u64,
    pub encoder_restarts: u64,
    pub encoder_start_failures: u64,
    pub flv_resyncs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let telemetry = Telemetry::default();
        assert_eq!(telemetry.snapshot(), TelemetrySnapshot::default());
    }

    #[test]
    fn increments_are_reflected_in_snapshot() {
        let telemetry = Telemetry::default();
        telemetry.inc_viewer_evicted_backpressure();
        telemetry.add_bytes_forwarded(4096);
        telemetry.inc_chunks_forwarded();
        telemetry.inc_encoder_restart();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.viewers_evicted_backpressure, 1);
        assert_eq!(snapshot.bytes_forwarded, 4096);
        assert_eq!(snapshot.chunks_forwarded, 1);
        assert_eq!(snapshot.encoder_restarts, 1);
    }
}
