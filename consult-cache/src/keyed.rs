//! Deduplicating request cache with last-call-wins semantics per key.
//!
//! Each key has at most one network call in flight. A newer call for the
//! same key aborts the older one and takes over its slot, so an old, slow
//! response can never overwrite the entry written by a newer call. Callers
//! that were superseded keep waiting on the slot and receive the outcome of
//! the call that replaced theirs. A slot that is cancelled with no successor
//! resolves every waiter to `Ok(None)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use consult_core::{CacheKey, FetchResult, HttpRequest, RequestOptions};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::counter::RequestCounter;
use crate::transport::HttpTransport;

/// A cached response body.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Value,
    pub stored_at: Instant,
    /// TTL chosen by the call that wrote this entry.
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Outcome of an in-flight slot as seen by its waiters.
#[derive(Debug, Clone)]
enum Settlement {
    Pending,
    Done(FetchResult<Value>),
    Cancelled,
}

struct InFlight {
    generation: u64,
    abort: AbortHandle,
    settled: watch::Sender<Settlement>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    in_flight: HashMap<CacheKey, InFlight>,
}

struct Inner {
    transport: Arc<dyn HttpTransport>,
    counter: Arc<RequestCounter>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    generation: AtomicU64,
}

/// Shared request cache. Cloning is cheap and every clone sees the same
/// entries.
#[derive(Clone)]
pub struct KeyedRequestCache {
    inner: Arc<Inner>,
}

impl KeyedRequestCache {
    /// Create a cache that reports to the process-wide [`RequestCounter`].
    pub fn new(transport: Arc<dyn HttpTransport>, config: CacheConfig) -> Self {
        Self::with_counter(transport, config, RequestCounter::global())
    }

    pub fn with_counter(
        transport: Arc<dyn HttpTransport>,
        config: CacheConfig,
        counter: Arc<RequestCounter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                counter,
                config,
                state: Mutex::new(CacheState::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn counter(&self) -> &Arc<RequestCounter> {
        &self.inner.counter
    }

    /// Fetch `request` with the default request TTL.
    ///
    /// Returns `Ok(None)` when the call was cancelled without a successor.
    pub async fn request(&self, request: &HttpRequest) -> FetchResult<Option<Value>> {
        self.request_with_ttl(request, self.inner.config.request_ttl)
            .await
    }

    /// Fetch `request`, caching a successful result for `ttl`.
    pub async fn request_with_ttl(
        &self,
        request: &HttpRequest,
        ttl: Duration,
    ) -> FetchResult<Option<Value>> {
        self.inner.counter.record(&request.url);
        let key = request.cache_key();

        let mut settled = {
            let mut state = self.inner.state.lock();
            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(Instant::now()) {
                    debug!(key = %key, "Cache hit");
                    return Ok(Some(entry.data.clone()));
                }
            }

            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let settled = match state.in_flight.remove(&key) {
                Some(previous) => {
                    previous.abort.abort();
                    debug!(
                        key = %key,
                        superseded = previous.generation,
                        generation,
                        "Superseding in-flight request"
                    );
                    previous.settled
                }
                None => {
                    debug!(key = %key, generation, "Cache miss");
                    watch::channel(Settlement::Pending).0
                }
            };
            let waiter = settled.subscribe();

            let task = tokio::spawn(Self::run(
                Arc::clone(&self.inner),
                key.clone(),
                request.clone(),
                ttl,
                generation,
            ));
            state.in_flight.insert(
                key,
                InFlight {
                    generation,
                    abort: task.abort_handle(),
                    settled,
                },
            );
            waiter
        };

        let outcome = match settled
            .wait_for(|s| !matches!(s, Settlement::Pending))
            .await
        {
            Ok(settlement) => settlement.clone(),
            // Slot dropped without settling: treat as cancelled.
            Err(_) => Settlement::Cancelled,
        };

        match outcome {
            Settlement::Done(Ok(data)) => Ok(Some(data)),
            Settlement::Done(Err(err)) => Err(err),
            Settlement::Pending | Settlement::Cancelled => Ok(None),
        }
    }

    /// Network half of a request. Only the generation currently owning the
    /// key's slot may write the cache and settle the waiters.
    async fn run(
        inner: Arc<Inner>,
        key: CacheKey,
        request: HttpRequest,
        ttl: Duration,
        generation: u64,
    ) {
        let result = inner.transport.send(&request).await;

        let in_flight = {
            let mut state = inner.state.lock();
            let owns_slot = state
                .in_flight
                .get(&key)
                .is_some_and(|slot| slot.generation == generation);
            if !owns_slot {
                debug!(key = %key, generation, "Discarding superseded response");
                return;
            }
            if let Ok(data) = &result {
                state.entries.insert(
                    key.clone(),
                    CacheEntry {
                        data: data.clone(),
                        stored_at: Instant::now(),
                        ttl,
                    },
                );
            }
            state.in_flight.remove(&key)
        };

        if let Err(err) = &result {
            debug!(key = %key, error = %err, "Request failed; not cached");
        }
        if let Some(in_flight) = in_flight {
            in_flight.settled.send_replace(Settlement::Done(result));
        }
    }

    /// Fetch and decode into `T` at the boundary.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        request: &HttpRequest,
    ) -> FetchResult<Option<T>> {
        match self.request(request).await? {
            Some(data) => Ok(Some(serde_json::from_value(data)?)),
            None => Ok(None),
        }
    }

    pub async fn get_json(&self, url: &str) -> FetchResult<Option<Value>> {
        self.request(&HttpRequest::get(url)).await
    }

    pub async fn post_json(&self, url: &str, body: Value) -> FetchResult<Option<Value>> {
        self.request(&HttpRequest::new(url, RequestOptions::post(body)))
            .await
    }

    pub async fn put_json(&self, url: &str, body: Value) -> FetchResult<Option<Value>> {
        self.request(&HttpRequest::new(url, RequestOptions::put(body)))
            .await
    }

    pub async fn delete_json(&self, url: &str) -> FetchResult<Option<Value>> {
        self.request(&HttpRequest::new(url, RequestOptions::delete()))
            .await
    }

    /// Cached value for `key`, fresh or not.
    pub fn peek(&self, key: &CacheKey) -> Option<Value> {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.data.clone())
    }

    /// Cached entry for `key` if it is still fresh.
    pub fn fresh_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .cloned()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().in_flight.contains_key(key)
    }

    /// Drop the cached entry for `key`. An in-flight request is left alone.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.inner.state.lock().entries.remove(key).is_some()
    }

    /// Drop every cached entry whose URL starts with `url_prefix`.
    pub fn invalidate_prefix(&self, url_prefix: &str) -> usize {
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|key, _| !key.has_url_prefix(url_prefix));
        before - state.entries.len()
    }

    /// Abort the in-flight request for `key`; its waiters resolve to `None`.
    pub fn cancel(&self, key: &CacheKey) -> bool {
        let in_flight = self.inner.state.lock().in_flight.remove(key);
        match in_flight {
            Some(in_flight) => {
                in_flight.abort.abort();
                in_flight.settled.send_replace(Settlement::Cancelled);
                debug!(key = %key, "Cancelled in-flight request");
                true
            }
            None => false,
        }
    }

    /// Drop all entries and cancel everything in flight.
    pub fn clear(&self) {
        let in_flight: Vec<InFlight> = {
            let mut state = self.inner.state.lock();
            state.entries.clear();
            state.in_flight.drain().map(|(_, slot)| slot).collect()
        };
        for slot in in_flight {
            slot.abort.abort();
            slot.settled.send_replace(Settlement::Cancelled);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for KeyedRequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("KeyedRequestCache")
            .field("entries", &state.entries.len())
            .field("in_flight", &state.in_flight.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
