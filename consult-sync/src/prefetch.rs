//! Login-time prefetch.
//!
//! Right after a session identity appears, the orchestrator issues the
//! queries the first screens will need so they are served from the cache.
//! Progress is published on a watch channel; individual failures are logged
//! and counted but never stop the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use consult_cache::KeyedRequestCache;
use consult_core::{FetchError, HttpRequest, Role, SessionIdentity, SessionStore};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often `schedule_after_login` checks the session store.
pub const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One query warmed by the prefetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedQuery {
    pub query_key: &'static str,
    pub url: String,
}

impl PlannedQuery {
    fn new(query_key: &'static str, url: String) -> Self {
        Self { query_key, url }
    }
}

/// Queries to warm for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefetchPlan {
    pub entries: Vec<PlannedQuery>,
}

impl PrefetchPlan {
    /// Profile, bookings and the course list for everyone, plus one
    /// role-specific query.
    pub fn for_identity(identity: &SessionIdentity) -> Self {
        let id = &identity.user_id;
        let mut entries = vec![
            PlannedQuery::new("profile", format!("/api/users/{id}")),
            PlannedQuery::new("bookings", format!("/api/bookings/user/{id}")),
            PlannedQuery::new("courses", "/api/courses".to_string()),
        ];
        match identity.role {
            Role::Student => {
                entries.push(PlannedQuery::new(
                    "grades",
                    format!("/api/grades/student/{id}"),
                ));
            }
            Role::Faculty => {
                entries.push(PlannedQuery::new(
                    "appointments",
                    format!("/api/consultations/faculty/{id}"),
                ));
            }
            Role::Admin => {
                entries.push(PlannedQuery::new("semesters", "/api/semesters".to_string()));
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Aggregate progress of a prefetch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PrefetchProgress {
    pub is_running: bool,
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

impl PrefetchProgress {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn at(completed: usize, total: usize) -> Self {
        Self {
            is_running: completed < total,
            completed,
            total,
            percent: percent(completed, total),
        }
    }
}

/// `floor(completed * 100 / total)`, clamped to 100. Zero when `total` is
/// zero.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let value = completed.min(total) * 100 / total;
    value as u8
}

/// Summary recorded when a run finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrefetchReport {
    pub last_prefetch_time: DateTime<Utc>,
    /// Requests observed by the counter since the run started.
    pub request_count: u64,
    pub planned: usize,
    pub failed: usize,
}

/// One planned query failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Prefetch of {query_key} ({url}) failed: {source}")]
pub struct PrefetchItemError {
    pub query_key: &'static str,
    pub url: String,
    #[source]
    pub source: FetchError,
}

struct Inner {
    cache: KeyedRequestCache,
    session: Arc<dyn SessionStore>,
    ttl: Duration,
    progress: watch::Sender<PrefetchProgress>,
    last_report: Mutex<Option<PrefetchReport>>,
}

/// Warms the cache for the signed-in user.
#[derive(Clone)]
pub struct PrefetchOrchestrator {
    inner: Arc<Inner>,
}

impl PrefetchOrchestrator {
    /// Cached results use the cache's prefetch tier TTL.
    pub fn new(cache: KeyedRequestCache, session: Arc<dyn SessionStore>) -> Self {
        let ttl = cache.config().prefetch_ttl;
        let (progress, _) = watch::channel(PrefetchProgress::idle());
        Self {
            inner: Arc::new(Inner {
                cache,
                session,
                ttl,
                progress,
                last_report: Mutex::new(None),
            }),
        }
    }

    pub fn progress(&self) -> PrefetchProgress {
        *self.inner.progress.borrow()
    }

    pub fn progress_changes(&self) -> watch::Receiver<PrefetchProgress> {
        self.inner.progress.subscribe()
    }

    pub fn last_report(&self) -> Option<PrefetchReport> {
        self.inner.last_report.lock().clone()
    }

    /// Plan for the current session, if anyone is signed in.
    pub fn plan(&self) -> Option<PrefetchPlan> {
        SessionIdentity::resolve(self.inner.session.as_ref())
            .map(|identity| PrefetchPlan::for_identity(&identity))
    }

    /// Run one prefetch. Returns `None` without touching the network when no
    /// session identity is present.
    ///
    /// Resets the request counter so the report counts only this run. Runs
    /// may overlap; the latest progress update wins.
    pub async fn trigger_prefetch(&self) -> Option<PrefetchReport> {
        let Some(identity) = SessionIdentity::resolve(self.inner.session.as_ref()) else {
            debug!("No session identity; skipping prefetch");
            self.inner.progress.send_replace(PrefetchProgress::idle());
            return None;
        };

        let plan = PrefetchPlan::for_identity(&identity);
        let total = plan.len();
        let counter = self.inner.cache.counter();
        counter.reset();
        self.inner
            .progress
            .send_replace(PrefetchProgress::at(0, total));
        info!(
            user_id = %identity.user_id,
            role = identity.role.as_str(),
            total,
            "Prefetch started"
        );

        let cache = &self.inner.cache;
        let ttl = self.inner.ttl;
        let mut pending: FuturesUnordered<_> = plan
            .entries
            .iter()
            .map(|entry| async move {
                let outcome = cache
                    .request_with_ttl(&HttpRequest::get(entry.url.clone()), ttl)
                    .await;
                (entry, outcome)
            })
            .collect();

        let mut completed = 0;
        let mut failed = 0;
        while let Some((entry, outcome)) = pending.next().await {
            completed += 1;
            if let Err(source) = outcome {
                failed += 1;
                let err = PrefetchItemError {
                    query_key: entry.query_key,
                    url: entry.url.clone(),
                    source,
                };
                warn!(error = %err, "Prefetch item failed");
            }
            self.inner
                .progress
                .send_replace(PrefetchProgress::at(completed, total));
        }

        let report = PrefetchReport {
            last_prefetch_time: Utc::now(),
            request_count: counter.total(),
            planned: total,
            failed,
        };
        info!(
            planned = report.planned,
            failed = report.failed,
            request_count = report.request_count,
            "Prefetch finished"
        );
        *self.inner.last_report.lock() = Some(report.clone());
        Some(report)
    }

    /// Wait until someone signs in, then prefetch once after `delay`.
    pub fn schedule_after_login(&self, delay: Duration) -> JoinHandle<Option<PrefetchReport>> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(SESSION_POLL_INTERVAL);
            loop {
                poll.tick().await;
                if SessionIdentity::resolve(orchestrator.inner.session.as_ref()).is_some() {
                    break;
                }
            }
            debug!(delay_ms = delay.as_millis() as u64, "Session found; scheduling prefetch");
            tokio::time::sleep(delay).await;
            orchestrator.trigger_prefetch().await
        })
    }
}

impl std::fmt::Debug for PrefetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchOrchestrator")
            .field("progress", &self.progress())
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity(role: Role) -> SessionIdentity {
        SessionIdentity {
            user_id: "42".to_string(),
            role,
            email: None,
        }
    }

    #[test]
    fn test_student_plan() {
        let plan = PrefetchPlan::for_identity(&identity(Role::Student));
        let urls: Vec<&str> = plan.entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "/api/users/42",
                "/api/bookings/user/42",
                "/api/courses",
                "/api/grades/student/42",
            ]
        );
    }

    #[test]
    fn test_role_specific_entries() {
        let faculty = PrefetchPlan::for_identity(&identity(Role::Faculty));
        assert_eq!(faculty.entries[3].query_key, "appointments");
        let admin = PrefetchPlan::for_identity(&identity(Role::Admin));
        assert_eq!(admin.entries[3].url, "/api/semesters");
        assert_eq!(admin.len(), 4);
    }

    #[test]
    fn test_progress_at() {
        assert_eq!(PrefetchProgress::at(0, 4).percent, 0);
        assert!(PrefetchProgress::at(3, 4).is_running);
        let done = PrefetchProgress::at(4, 4);
        assert!(!done.is_running);
        assert_eq!(done.percent, 100);
        assert_eq!(PrefetchProgress::at(1, 3).percent, 33);
        assert_eq!(PrefetchProgress::idle(), PrefetchProgress::at(0, 0));
    }

    proptest! {
        #[test]
        fn prop_percent_is_floor_and_bounded(total in 1usize..500, done in 0usize..600) {
            let p = percent(done, total);
            prop_assert!(p <= 100);
            let done = done.min(total);
            prop_assert_eq!(p as usize, done * 100 / total);
        }

        #[test]
        fn prop_percent_is_monotonic(total in 1usize..200, done in 0usize..200) {
            prop_assert!(percent(done, total) <= percent(done + 1, total));
        }
    }
}
