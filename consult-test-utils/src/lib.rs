//! Consult Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - [`MockTransport`]: scripted HTTP backend with per-URL call counts
//! - Session fixtures for each role
//! - Proptest generators for requests
//! - Small async helpers for waiting on watch channels

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub use consult_cache::{CacheConfig, HttpTransport, KeyedRequestCache, RequestCounter};
pub use consult_core::{
    CacheKey, FetchError, FetchResult, HttpRequest, MemorySessionStore, Method, RequestOptions,
    Role, SessionIdentity, SessionStore, STUDENT_ID, TEACHER_ID, USER_EMAIL, USER_ID, USER_ROLE,
};
pub use consult_realtime::{
    ConnectionState, MemoryConnector, RealtimeChannel, ReconnectConfig,
};

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted answer.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub delay: Duration,
    pub result: FetchResult<Value>,
}

impl MockResponse {
    pub fn ok(value: Value) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(value),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(FetchError::Status {
                status,
                message: Some(message.into()),
            }),
        }
    }

    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(FetchError::Transport(message.into())),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
struct MockInner {
    queued: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    routes: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<Vec<HttpRequest>>,
}

/// Scripted backend keyed by full URL (query string included).
///
/// One-shot responses queued with [`enqueue`](Self::enqueue) are used first;
/// after that the standing response from [`respond`](Self::respond) applies.
/// Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: MockResponse) -> &Self {
        self.inner.routes.lock().insert(url.to_string(), response);
        self
    }

    pub fn enqueue(&self, url: &str, response: MockResponse) -> &Self {
        self.inner
            .queued
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Network calls that reached the transport for `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.calls.lock().clone()
    }

    pub fn arc(&self) -> Arc<dyn HttpTransport> {
        Arc::new(self.clone())
    }

    fn next_response(&self, url: &str) -> MockResponse {
        if let Some(response) = self
            .inner
            .queued
            .lock()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
        {
            return response;
        }
        self.inner
            .routes
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| MockResponse::status(404, format!("no mock route for {url}")))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &HttpRequest) -> FetchResult<Value> {
        self.inner.calls.lock().push(request.clone());
        let response = self.next_response(&request.url);
        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        response.result
    }
}

/// Cache over `transport` with a private counter, so parallel tests don't
/// share counts.
pub fn test_cache(transport: &MockTransport) -> KeyedRequestCache {
    KeyedRequestCache::with_counter(
        transport.arc(),
        CacheConfig::default(),
        Arc::new(RequestCounter::new()),
    )
}

// ============================================================================
// REALTIME
// ============================================================================

/// Reconnect policy with short, jitter-free delays.
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_ms: 10,
        max_ms: 40,
        multiplier: 2.0,
        jitter_ms: 0,
    }
}

/// Started channel over a fresh in-memory link.
pub fn memory_channel() -> (Arc<RealtimeChannel>, MemoryConnector) {
    let connector = MemoryConnector::new();
    let channel = Arc::new(RealtimeChannel::new(connector.clone(), fast_reconnect()));
    channel.start();
    (channel, connector)
}

/// Wait (up to five seconds) for the channel to reach `expected`.
pub async fn wait_for_state(channel: &RealtimeChannel, expected: ConnectionState) -> bool {
    let mut changes = channel.state_changes();
    let reached = matches!(
        tokio::time::timeout(
            Duration::from_secs(5),
            changes.wait_for(|state| *state == expected),
        )
        .await,
        Ok(Ok(_))
    );
    reached
}

/// Poll `condition` every few milliseconds until it holds or five seconds
/// pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ============================================================================
// SESSION FIXTURES
// ============================================================================

pub fn student_session(user_id: &str) -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::with_entries([
        (USER_ROLE, "student"),
        (STUDENT_ID, user_id),
        (USER_EMAIL, "student@uni.edu"),
    ]))
}

pub fn faculty_session(user_id: &str) -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::with_entries([
        (USER_ROLE, "faculty"),
        (TEACHER_ID, user_id),
        (USER_EMAIL, "faculty@uni.edu"),
    ]))
}

pub fn admin_session(user_id: &str) -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::with_entries([
        (USER_ROLE, "admin"),
        (USER_ID, user_id),
        (USER_EMAIL, "admin@uni.edu"),
    ]))
}

pub fn empty_session() -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::new())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_method() -> impl Strategy<Value = Method> {
        prop_oneof![
            Just(Method::Get),
            Just(Method::Post),
            Just(Method::Put),
            Just(Method::Delete),
        ]
    }

    pub fn arb_api_path() -> impl Strategy<Value = String> {
        (
            prop_oneof![
                Just("users"),
                Just("bookings"),
                Just("courses"),
                Just("grades"),
                Just("semesters"),
            ],
            proptest::option::of(1u32..10_000),
        )
            .prop_map(|(resource, id)| match id {
                Some(id) => format!("/api/{resource}/{id}"),
                None => format!("/api/{resource}"),
            })
    }

    pub fn arb_request() -> impl Strategy<Value = HttpRequest> {
        (arb_api_path(), arb_method(), proptest::option::of(0i64..1_000)).prop_map(
            |(url, method, body)| {
                let options = RequestOptions {
                    method,
                    body: body.map(|n| serde_json::json!({ "n": n })),
                    ..RequestOptions::default()
                };
                HttpRequest::new(url, options)
            },
        )
    }
}
