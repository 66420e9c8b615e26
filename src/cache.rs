//! Short-lived per-market analysis cache.
//!
//! A market analysed in the last TTL window is not re-analysed even
//! when no trade was committed (for example after an inconsistent
//! validation). Reads check expiry lazily, so correctness never
//! depends on the background sweeper — the sweeper only reclaims
//! memory for entries nobody asks about again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::types::FinalRecommendation;

/// Default entry lifetime: 20 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1200);
/// Default sweep cadence: 2 minutes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(120);

struct Entry {
    value: FinalRecommendation,
    inserted_at: Instant,
}

/// TTL cache keyed by market id.
#[derive(Clone)]
pub struct AnalysisCache {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Record an analysis outcome for a market. Overwrites any
    /// previous entry and restarts its TTL.
    pub fn insert(&self, market_id: &str, value: FinalRecommendation) {
        let mut map = self.lock();
        map.insert(
            market_id.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
        trace!(market_id, "Cached analysis");
    }

    /// Fetch a still-fresh entry. Expired entries are dropped on read.
    pub fn get(&self, market_id: &str) -> Option<FinalRecommendation> {
        let mut map = self.lock();
        match map.get(market_id) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Some(entry.value.clone())
            }
            Some(_) => {
                map.remove(market_id);
                None
            }
            None => None,
        }
    }

    pub fn contains_fresh(&self, market_id: &str) -> bool {
        self.get(market_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every expired entry.
    pub fn sweep(&self) {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        let evicted = before - map.len();
        if evicted > 0 {
            debug!(evicted, remaining = map.len(), "Swept analysis cache");
        }
    }

    /// Spawn the periodic sweeper. The task runs for the process
    /// lifetime; it holds only a clone of the shared map.
    pub fn start_sweeper(&self, interval: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // Lock poisoning only happens if a holder panicked; the map is
        // still structurally valid, so keep going with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
