//! Bounded caches for VRF log processing.
//!
//! All three caches bound their memory by pruning old entries as a side
//! effect of inserts and head updates. There are no timer tasks: a cache
//! that stops receiving traffic stops growing.
pub use inflight_cache::InflightCache;
pub use log_deduper::{LogDeduper, LogKey};
pub use metrics::{DefaultSink, MetricsSink, NoopSink};
pub use rate_limiter::{ForceFulfillRateLimiter, MAX_FORCE_FULFILLMENTS};

mod inflight_cache;
mod log_deduper;
pub mod metrics;
mod rate_limiter;
