//! Per-subscription cap on forced fulfillments.
use std::{collections::HashMap, sync::Mutex};

/// Maximum number of forced fulfillments per subscription within one
/// prune interval of blocks.
pub const MAX_FORCE_FULFILLMENTS: u64 = 10;

struct Inner {
    counts: HashMap<u64, u64>,
    latest_head: u64,
}

/// Limits how often a subscription may be force-fulfilled.
///
/// Counters reset whenever the chain head crosses a prune interval
/// boundary, so the cap applies per window rather than forever.
pub struct ForceFulfillRateLimiter {
    inner: Mutex<Inner>,
    prune_interval: u64,
}

impl ForceFulfillRateLimiter {
    /// Constructs a limiter with counter windows of `prune_interval` blocks.
    pub fn new(prune_interval: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counts: HashMap::new(),
                latest_head: 0,
            }),
            prune_interval,
        }
    }

    /// Whether `sub_id` is still under its fulfillment budget.
    pub fn should_fulfill(&self, sub_id: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.counts.get(&sub_id).copied().unwrap_or(0) < MAX_FORCE_FULFILLMENTS
    }

    /// Records a performed fulfillment for `sub_id`.
    pub fn fulfillment_performed(&self, sub_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.counts.entry(sub_id).or_insert(0) += 1;
    }

    /// Advances the observed chain head. Regressing heads are ignored.
    pub fn set_latest_head(&self, head: u64) {
        let mut inner = self.inner.lock().unwrap();
        if head <= inner.latest_head {
            return;
        }
        if head / self.prune_interval > inner.latest_head / self.prune_interval {
            let cleared = inner.counts.len();
            inner.counts.clear();
            tracing::debug!("cleared {cleared} fulfillment counters at head {head}");
        }
        inner.latest_head = head;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_fulfillments_per_subscription() {
        let limiter = ForceFulfillRateLimiter::new(1000);
        for _ in 0..MAX_FORCE_FULFILLMENTS {
            assert!(limiter.should_fulfill(7));
            limiter.fulfillment_performed(7);
        }
        assert!(!limiter.should_fulfill(7));
        // Other subscriptions are unaffected.
        assert!(limiter.should_fulfill(8));
    }

    #[test]
    fn crossing_interval_boundary_resets_counters() {
        let limiter = ForceFulfillRateLimiter::new(1000);
        for _ in 0..MAX_FORCE_FULFILLMENTS {
            limiter.fulfillment_performed(7);
        }
        assert!(!limiter.should_fulfill(7));

        limiter.set_latest_head(500);
        // Still within the same window.
        assert!(!limiter.should_fulfill(7));

        limiter.set_latest_head(1001);
        assert!(limiter.should_fulfill(7));
    }

    #[test]
    fn regressing_head_is_a_noop() {
        let limiter = ForceFulfillRateLimiter::new(1000);
        limiter.set_latest_head(2500);
        limiter.fulfillment_performed(7);
        for _ in 0..MAX_FORCE_FULFILLMENTS {
            limiter.fulfillment_performed(9);
        }
        // A head behind the latest one must not clear anything, even if it
        // lands in an earlier window.
        limiter.set_latest_head(1500);
        assert!(!limiter.should_fulfill(9));
    }
}
