//! Deduplication of chain logs across re-deliveries and reorgs.
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use crate::metrics::MetricsSink;

/// Identity of a chain log. The block hash participates, so the same log
/// re-delivered on a different fork counts as new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogKey {
    /// Hash of the block containing the log.
    pub block_hash: [u8; 32],
    /// Number of the block containing the log.
    pub block_number: u64,
    /// Index of the log within the block.
    pub log_index: u32,
}

struct Inner {
    seen: HashSet<LogKey>,
    /// Block height at which the last prune ran.
    last_prune_height: u64,
}

/// Tracks which logs have already been delivered.
///
/// Entries older than `lookback` blocks are pruned whenever an insert
/// advances the observed height at least `prune_interval` blocks past the
/// previous prune.
pub struct LogDeduper {
    inner: Mutex<Inner>,
    lookback: u64,
    prune_interval: u64,
    sink: Arc<dyn MetricsSink>,
}

impl LogDeduper {
    /// Constructs a deduper remembering `lookback` blocks worth of logs.
    pub fn new(lookback: u64, prune_interval: u64, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashSet::new(),
                last_prune_height: 0,
            }),
            lookback,
            prune_interval,
            sink,
        }
    }

    /// Test-and-set: returns whether `key` is seen for the first time.
    /// Duplicates are counted as dropped requests.
    pub fn should_deliver(&self, key: &LogKey) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let fresh = inner.seen.insert(*key);
        if fresh {
            self.sink.inc_processed_reqs();
        } else {
            self.sink.inc_dropped_reqs();
        }
        self.prune(&mut inner, key.block_number);
        fresh
    }

    fn prune(&self, inner: &mut Inner, height: u64) {
        if height.saturating_sub(inner.last_prune_height) < self.prune_interval {
            return;
        }
        let cutoff = height.saturating_sub(self.lookback);
        let before = inner.seen.len();
        inner.seen.retain(|key| key.block_number >= cutoff);
        inner.last_prune_height = height;
        tracing::debug!(
            "pruned {} log entries below block {cutoff}",
            before - inner.seen.len()
        );
    }
}
