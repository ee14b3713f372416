//! Gateway metrics.
use std::time::Duration;

use vise::{Buckets, Counter, EncodeLabelValue, Gauge, Histogram, LabeledFamily, Metrics, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum ResultLabel {
    Ok,
    Err,
}

#[derive(Debug, Metrics)]
#[metrics(prefix = "gateway")]
pub(crate) struct GatewayMetrics {
    /// Latency of user request handling in seconds.
    #[metrics(unit = Unit::Seconds, buckets = Buckets::LATENCIES)]
    pub(crate) user_request_latency: Histogram<Duration>,
    /// Number of user requests served, by outcome.
    #[metrics(labels = ["result"])]
    pub(crate) user_requests: LabeledFamily<ResultLabel, Counter>,
    /// Number of node messages dispatched to handlers, by outcome.
    #[metrics(labels = ["result"])]
    pub(crate) node_messages: LabeledFamily<ResultLabel, Counter>,
    /// Number of node handshake attempts that were rejected.
    pub(crate) handshake_rejections: Counter,
    /// Number of currently connected nodes, across all DONs.
    pub(crate) connected_nodes: Gauge<usize>,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<GatewayMetrics> = vise::Global::new();
