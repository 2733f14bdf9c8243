//! Single-flight credential refresh with one retry per call.
//!
//! [`AuthRefreshCoordinator::run`] executes an operation; when it fails with
//! an auth-classified error the coordinator refreshes the credentials and
//! resubmits the operation exactly once. Concurrent failures share a single
//! in-flight refresh: the first caller starts it, everyone else awaits the
//! same [`Shared`] future, and whoever observes completion first clears the
//! slot.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use br_domain::credentials::CredentialSet;
use br_domain::error::Result;
use br_domain::trace::TraceEvent;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::credentials::CredentialStore;

/// Produces a fresh [`CredentialSet`], e.g. by re-fetching the web page
/// and scraping new tokens. How that happens is up to the implementor.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<CredentialSet>;
}

#[async_trait]
impl<F, Fut> CredentialRefresher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<CredentialSet>> + Send + 'static,
{
    async fn refresh(&self) -> Result<CredentialSet> {
        (self)().await
    }
}

/// Outcome shared with every waiter. The error is the refresh failure
/// message; callers surface their own original error instead.
pub type RefreshOutcome = std::result::Result<(), String>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct InFlight {
    id: u64,
    future: SharedRefresh,
    started: Instant,
    waiters: usize,
}

pub struct AuthRefreshCoordinator {
    refresher: Arc<dyn CredentialRefresher>,
    credentials: Arc<CredentialStore>,
    inflight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    settle_delay: Duration,
}

impl AuthRefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn CredentialRefresher>,
        credentials: Arc<CredentialStore>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            refresher,
            credentials,
            inflight: Mutex::new(None),
            next_id: AtomicU64::new(0),
            settle_delay,
        }
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inflight.lock().is_some()
    }

    /// Run `op`, refreshing credentials and retrying once on auth failure.
    ///
    /// `op` receives `false` on the first attempt and `true` on the retry.
    /// If the refresh fails, the original error is returned. A second auth
    /// failure is returned as-is without another refresh. A failure from a
    /// call sent with credentials that have since been replaced goes
    /// straight to the retry.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(bool) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let sent_with = self.credentials.snapshot();
        let original = match op(false).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_auth_candidate() => e,
            Err(e) => return Err(e),
        };

        if !Arc::ptr_eq(&sent_with, &self.credentials.snapshot()) {
            tracing::debug!(
                error = %original,
                "auth failure on stale credentials, retrying with current set"
            );
            return op(true).await;
        }

        tracing::warn!(
            error = %original,
            method_id = ?original.method_id(),
            "auth failure, refreshing credentials"
        );

        if let Err(reason) = self.refresh().await {
            tracing::warn!(
                reason = %reason,
                "credential refresh failed; surfacing original error"
            );
            return Err(original);
        }

        // Server-side session state is eventually consistent.
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let retried = op(true).await;
        if let Err(ref e) = retried {
            if e.is_auth_candidate() {
                tracing::warn!(error = %e, "auth failure persists after refresh");
            }
        }
        retried
    }

    /// Join the in-flight refresh, or start one if none is running.
    pub async fn refresh(&self) -> RefreshOutcome {
        let (id, future) = {
            let mut slot = self.inflight.lock();
            match slot.as_mut() {
                Some(inflight) => {
                    inflight.waiters += 1;
                    (inflight.id, inflight.future.clone())
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = start_refresh(
                        Arc::clone(&self.refresher),
                        Arc::clone(&self.credentials),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                        started: Instant::now(),
                        waiters: 1,
                    });
                    (id, future)
                }
            }
        };

        let outcome = future.await;
        self.settle(id, &outcome);
        outcome
    }

    /// Clear the slot if it still holds refresh `id`. Later completions of
    /// the same refresh find it gone and do nothing.
    fn settle(&self, id: u64, outcome: &RefreshOutcome) {
        let finished = {
            let mut slot = self.inflight.lock();
            if slot.as_ref().is_some_and(|f| f.id == id) {
                slot.take()
            } else {
                None
            }
        };

        if let Some(done) = finished {
            TraceEvent::AuthRefresh {
                succeeded: outcome.is_ok(),
                waiters: done.waiters,
                duration_ms: done.started.elapsed().as_millis() as u64,
            }
            .emit();
        }
    }
}

impl std::fmt::Debug for AuthRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

async fn start_refresh(
    refresher: Arc<dyn CredentialRefresher>,
    credentials: Arc<CredentialStore>,
) -> RefreshOutcome {
    match refresher.refresh().await {
        Ok(next) => {
            credentials.apply(next);
            tracing::info!("credentials refreshed");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(error = %e, "credential refresh failed");
            Err(e.to_string())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
