//! Per-path request counter.

use consult_core::request_path;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::Arc;

static GLOBAL: Lazy<Arc<RequestCounter>> = Lazy::new(|| Arc::new(RequestCounter::new()));

/// Counts calls per URL path (query string stripped).
///
/// Every `request` call is counted, cache hits included.
#[derive(Debug, Default)]
pub struct RequestCounter {
    counts: DashMap<String, u64>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide counter shared by caches that don't bring their own.
    pub fn global() -> Arc<RequestCounter> {
        Arc::clone(&GLOBAL)
    }

    pub fn record(&self, url: &str) {
        *self
            .counts
            .entry(request_path(url).to_string())
            .or_insert(0) += 1;
    }

    pub fn count(&self, path: &str) -> u64 {
        self.counts
            .get(request_path(path))
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|entry| *entry.value()).sum()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn reset(&self) {
        self.counts.clear();
    }
}
