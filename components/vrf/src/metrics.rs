//! Metrics sink injected into the caches.
//!
//! The caches report through a trait object rather than a global, so library
//! users embedding them in a larger process can route the numbers wherever
//! they like. [`DefaultSink`] forwards to process-wide registered metrics.
use vise::{Counter, Gauge, Metrics};

/// Receiver of cache events.
pub trait MetricsSink: Send + Sync {
    /// A log was seen for the first time and passed on.
    fn inc_processed_reqs(&self);
    /// A duplicate log was dropped.
    fn inc_dropped_reqs(&self);
    /// The inflight cache changed size.
    fn update_queue_size(&self, size: usize);
}

#[derive(Debug, Metrics)]
#[metrics(prefix = "vrf")]
struct VrfMetrics {
    /// Number of logs passed on for processing.
    processed_requests: Counter,
    /// Number of duplicate logs dropped.
    dropped_requests: Counter,
    /// Current number of requests tracked as in flight.
    inflight_requests: Gauge<usize>,
}

#[vise::register]
static METRICS: vise::Global<VrfMetrics> = vise::Global::new();

/// Sink reporting to the process-wide metrics registry.
#[derive(Debug, Default)]
pub struct DefaultSink;

impl MetricsSink for DefaultSink {
    fn inc_processed_reqs(&self) {
        METRICS.processed_requests.inc();
    }

    fn inc_dropped_reqs(&self) {
        METRICS.dropped_requests.inc();
    }

    fn update_queue_size(&self, size: usize) {
        METRICS.inflight_requests.set(size);
    }
}

/// Sink discarding all events.
#[derive(Debug, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn inc_processed_reqs(&self) {}
    fn inc_dropped_reqs(&self) {}
    fn update_queue_size(&self, _size: usize) {}
}
