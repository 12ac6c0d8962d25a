use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Debug, Default)]
struct InnerMetrics {
    events_applied: AtomicU64,
    batches_merged: AtomicU64,
    merge_failures: AtomicU64,
    retry_count: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub events_applied: u64,
    pub batches_merged: u64,
    pub merge_failures: u64,
    pub retry_count: u64,
    pub bytes_written: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn record_events_applied(&self, count: u64) {
        self.inner.events_applied.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_merged(&self) {
        self.inner.batches_merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merge_failure(&self) {
        self.inner.merge_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.inner.retry_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, count: u64) {
        self.inner.bytes_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_applied: self.inner.events_applied.load(Ordering::Relaxed),
            batches_merged: self.inner.batches_merged.load(Ordering::Relaxed),
            merge_failures: self.inner.merge_failures.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            bytes_written: self.inner.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = Metrics::new();
        metrics.record_events_applied(3);
        metrics.record_batch_merged();
        metrics.record_retry();
        let snap = metrics.snapshot();
        assert_eq!(snap.events_applied, 3);
        assert_eq!(snap.batches_merged, 1);
        assert_eq!(snap.retry_count, 1);
        assert_eq!(snap.merge_failures, 0);
    }
}
