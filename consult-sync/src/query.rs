//! Cached queries kept fresh by realtime events.
//!
//! A [`SyncedQuery`] owns the state a view renders (`data`, `is_loading`,
//! `error`) for one cache key. It fetches on mount, refetches when a push
//! event arrives on its topic, and refetches when its dependencies change.
//! Results are applied in issue order: a response for an older fetch never
//! replaces the state written by a newer one.
//!
//! The topic subscription is attached once the channel is connected and is
//! detached when the query is disabled, retargeted, or dropped.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use consult_cache::KeyedRequestCache;
use consult_core::{CacheKey, FetchError, FetchResult, HttpRequest};
use consult_realtime::{ConnectionState, RealtimeChannel, Subscription};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Converts the raw JSON body into the query's data type.
pub type Transform<T> = Arc<dyn Fn(Value) -> FetchResult<T> + Send + Sync>;

/// Produces the raw JSON for a query.
///
/// `Ok(None)` means the fetch was superseded or cancelled and carries no new
/// data.
#[async_trait]
pub trait QueryFetcher: Send + Sync + 'static {
    async fn fetch(&self) -> FetchResult<Option<Value>>;

    /// Forget any cached copy so the next fetch goes to the network.
    fn invalidate(&self) {}
}

/// Fetches one request through the shared cache with a fixed TTL.
#[derive(Debug, Clone)]
pub struct CachedFetch {
    cache: KeyedRequestCache,
    request: HttpRequest,
    ttl: Duration,
}

impl CachedFetch {
    pub fn new(cache: KeyedRequestCache, request: HttpRequest, ttl: Duration) -> Self {
        Self {
            cache,
            request,
            ttl,
        }
    }

    /// Fetch with the cache's query tier TTL.
    pub fn with_query_ttl(cache: KeyedRequestCache, request: HttpRequest) -> Self {
        let ttl = cache.config().query_ttl;
        Self::new(cache, request, ttl)
    }

    pub fn cache_key(&self) -> CacheKey {
        self.request.cache_key()
    }
}

#[async_trait]
impl QueryFetcher for CachedFetch {
    async fn fetch(&self) -> FetchResult<Option<Value>> {
        self.cache.request_with_ttl(&self.request, self.ttl).await
    }

    fn invalidate(&self) {
        self.cache.invalidate(&self.request.cache_key());
    }
}

/// Adapts an async closure into a [`QueryFetcher`].
pub struct FnFetcher<F>(F);

impl<F, Fut> FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Option<Value>>> + Send + 'static,
{
    pub fn new(fetch: F) -> Self {
        Self(fetch)
    }
}

#[async_trait]
impl<F, Fut> QueryFetcher for FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult<Option<Value>>> + Send + 'static,
{
    async fn fetch(&self) -> FetchResult<Option<Value>> {
        (self.0)().await
    }
}

/// What a view renders.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<FetchError>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            error: None,
        }
    }
}

/// Options for [`SyncedQuery::mount`].
pub struct QueryOptions<T> {
    pub topic: Option<String>,
    pub dependencies: Vec<Value>,
    pub transform: Option<Transform<T>>,
    pub enabled: bool,
    pub channel: Option<Arc<RealtimeChannel>>,
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            topic: None,
            dependencies: Vec::new(),
            transform: None,
            enabled: true,
            channel: None,
        }
    }
}

impl<T> QueryOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<Value>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> FetchResult<T> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn channel(mut self, channel: Arc<RealtimeChannel>) -> Self {
        self.channel = Some(channel);
        self
    }
}

struct Control {
    enabled: bool,
    topic: Option<String>,
    dependencies: Vec<Value>,
    subscription: Option<Subscription>,
    watcher: Option<JoinHandle<()>>,
}

struct QueryInner<T> {
    key: CacheKey,
    fetcher: Arc<dyn QueryFetcher>,
    transform: Transform<T>,
    channel: Option<Arc<RealtimeChannel>>,
    state: watch::Sender<QueryState<T>>,
    /// Sequence number of the most recently issued fetch.
    issued: AtomicU64,
    /// Sequence number of the most recently applied fetch.
    applied: Mutex<u64>,
    control: Mutex<Control>,
}

/// A live query handle. Dropping it detaches the topic subscription.
pub struct SyncedQuery<T> {
    inner: Arc<QueryInner<T>>,
}

impl<T> SyncedQuery<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Mount a query and start its first fetch. Must be called inside a
    /// tokio runtime.
    pub fn mount(
        key: CacheKey,
        fetcher: Arc<dyn QueryFetcher>,
        options: QueryOptions<T>,
    ) -> Self {
        let transform = match options.transform {
            Some(transform) => transform,
            None => decode_transform::<T>(),
        };
        let (state, _) = watch::channel(QueryState::default());
        let inner = Arc::new(QueryInner {
            key,
            fetcher,
            transform,
            channel: options.channel,
            state,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            control: Mutex::new(Control {
                enabled: options.enabled,
                topic: options.topic,
                dependencies: options.dependencies,
                subscription: None,
                watcher: None,
            }),
        });

        if let Some(channel) = &inner.channel {
            let watcher = tokio::spawn(watch_connection(
                Arc::downgrade(&inner),
                channel.state_changes(),
            ));
            inner.control.lock().watcher = Some(watcher);
        }
        inner.sync_subscription();
        inner.spawn_load(false);

        debug!(key = %inner.key, enabled = options.enabled, "Query mounted");
        Self { inner }
    }
}

impl<T> SyncedQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &CacheKey {
        &self.inner.key
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().is_loading
    }

    pub fn error(&self) -> Option<FetchError> {
        self.inner.state.borrow().error.clone()
    }

    /// Receive every state change.
    pub fn watch(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.control.lock().enabled
    }

    pub fn topic(&self) -> Option<String> {
        self.inner.control.lock().topic.clone()
    }

    /// Whether a topic handler is currently attached.
    pub fn is_subscribed(&self) -> bool {
        self.inner.control.lock().subscription.is_some()
    }

    /// Invalidate and fetch again, returning the resulting state. Does
    /// nothing while disabled.
    pub async fn refetch(&self) -> QueryState<T> {
        if let Some(seq) = self.inner.begin() {
            Arc::clone(&self.inner).load(seq, true).await;
        }
        self.state()
    }

    /// Enabling fetches and subscribes; disabling drops the subscription and
    /// discards results still in flight.
    pub fn set_enabled(&self, enabled: bool) {
        {
            let mut control = self.inner.control.lock();
            if control.enabled == enabled {
                return;
            }
            control.enabled = enabled;
        }
        if enabled {
            self.inner.spawn_load(false);
        } else {
            *self.inner.applied.lock() = self.inner.issued.load(Ordering::SeqCst);
            self.inner.state.send_modify(|state| state.is_loading = false);
        }
        self.inner.sync_subscription();
    }

    /// Move the subscription to another topic, or drop it with `None`.
    pub fn set_topic(&self, topic: Option<String>) {
        {
            let mut control = self.inner.control.lock();
            if control.topic == topic {
                return;
            }
            control.topic = topic;
        }
        self.inner.sync_subscription();
    }

    /// Refetch when `dependencies` differs from the current set.
    pub fn set_dependencies(&self, dependencies: Vec<Value>) {
        {
            let mut control = self.inner.control.lock();
            if control.dependencies == dependencies {
                return;
            }
            control.dependencies = dependencies;
        }
        self.inner.spawn_load(true);
    }
}

impl<T> Drop for SyncedQuery<T> {
    fn drop(&mut self) {
        let mut control = self.inner.control.lock();
        if let Some(watcher) = control.watcher.take() {
            watcher.abort();
        }
        if let Some(subscription) = control.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl<T> fmt::Debug for SyncedQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = self.inner.control.lock();
        f.debug_struct("SyncedQuery")
            .field("key", &self.inner.key)
            .field("enabled", &control.enabled)
            .field("topic", &control.topic)
            .field("subscribed", &control.subscription.is_some())
            .finish()
    }
}

impl<T> QueryInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Issue a sequence number and mark the query loading. `None` while
    /// disabled.
    fn begin(&self) -> Option<u64> {
        if !self.control.lock().enabled {
            return None;
        }
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.is_loading = true);
        Some(seq)
    }

    fn spawn_load(self: &Arc<Self>, invalidate: bool) {
        if let Some(seq) = self.begin() {
            tokio::spawn(Arc::clone(self).load(seq, invalidate));
        }
    }

    async fn load(self: Arc<Self>, seq: u64, invalidate: bool) {
        if invalidate {
            self.fetcher.invalidate();
        }
        let outcome = self.fetcher.fetch().await;
        self.apply(seq, outcome);
    }

    fn apply(&self, seq: u64, outcome: FetchResult<Option<Value>>) {
        let mut applied = self.applied.lock();
        if seq <= *applied {
            debug!(key = %self.key, seq, applied = *applied, "Discarding out-of-order result");
            return;
        }
        *applied = seq;
        let still_loading = seq != self.issued.load(Ordering::SeqCst);

        let outcome = match outcome {
            Ok(Some(raw)) => (self.transform)(raw).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(key = %self.key, error = %err, "Query fetch failed");
        }

        self.state.send_modify(|state| {
            match outcome {
                Ok(Some(data)) => {
                    state.data = Some(data);
                    state.error = None;
                }
                // Superseded or cancelled: keep what we have.
                Ok(None) => {}
                Err(err) => state.error = Some(err),
            }
            state.is_loading = still_loading;
        });
    }

    /// Bring the topic subscription in line with `enabled`, `topic`, and the
    /// channel's connection state.
    fn sync_subscription(self: &Arc<Self>) {
        let Some(channel) = &self.channel else {
            return;
        };
        let mut control = self.control.lock();
        let wanted = match &control.topic {
            Some(topic) if control.enabled => Some(topic.clone()),
            _ => None,
        };

        let current = control
            .subscription
            .as_ref()
            .map(|subscription| subscription.topic().to_string());
        if current == wanted {
            return;
        }

        if let Some(old) = control.subscription.take() {
            debug!(key = %self.key, topic = old.topic(), "Query unsubscribed");
            old.unsubscribe();
        }

        // Attach only on a live connection; the watcher retries on connect.
        if let Some(topic) = wanted {
            if channel.is_connected() {
                let query = Arc::downgrade(self);
                let subscription = channel.subscribe(&topic, move |_payload: &Value| {
                    if let Some(query) = query.upgrade() {
                        query.spawn_load(true);
                    }
                });
                debug!(key = %self.key, topic = %topic, "Query subscribed");
                control.subscription = Some(subscription);
            }
        }
    }
}

fn decode_transform<T: DeserializeOwned>() -> Transform<T> {
    Arc::new(|raw: Value| serde_json::from_value::<T>(raw).map_err(FetchError::from))
}

async fn watch_connection<T>(
    query: Weak<QueryInner<T>>,
    mut changes: watch::Receiver<ConnectionState>,
) where
    T: Clone + Send + Sync + 'static,
{
    while changes.changed().await.is_ok() {
        let state = *changes.borrow_and_update();
        let Some(query) = query.upgrade() else {
            return;
        };
        if state == ConnectionState::Connected {
            query.sync_subscription();
        }
    }
}
