//! `RpcClient`: the single entry point domain modules call.
//!
//! Bundles the transport, the auth refresh coordinator, the conversation
//! cache and the poll presets. Without a refresher, auth failures surface
//! directly to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use br_domain::config::{Config, PollingConfig};
use br_domain::credentials::CredentialSet;
use br_domain::error::Result;
use br_domain::job::JobStatus;
use br_sessions::ConversationCache;
use serde_json::Value;

use crate::codec::RpcRequest;
use crate::credentials::CredentialStore;
use crate::poller;
use crate::refresh::{AuthRefreshCoordinator, CredentialRefresher};
use crate::transport::RpcTransport;

pub struct RpcClient {
    transport: RpcTransport,
    refresh: Option<AuthRefreshCoordinator>,
    conversations: Arc<ConversationCache>,
    polling: PollingConfig,
    settle_delay: Duration,
}

impl RpcClient {
    pub fn new(config: &Config, credentials: CredentialSet) -> Self {
        let store = Arc::new(CredentialStore::new(credentials));
        Self {
            transport: RpcTransport::new(&config.transport, store),
            refresh: None,
            conversations: Arc::new(ConversationCache::from_config(&config.conversation)),
            polling: config.polling.clone(),
            settle_delay: Duration::from_millis(config.transport.settle_delay_ms),
        }
    }

    /// Enable transparent refresh-and-retry on auth failures.
    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresh = Some(AuthRefreshCoordinator::new(
            refresher,
            Arc::clone(self.transport.credentials()),
            self.settle_delay,
        ));
        self
    }

    pub fn open(&self) -> Result<()> {
        self.transport.open()
    }

    pub fn close(&self) {
        self.transport.close()
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        self.transport.credentials()
    }

    pub fn conversations(&self) -> Arc<ConversationCache> {
        Arc::clone(&self.conversations)
    }

    pub fn transport(&self) -> &RpcTransport {
        &self.transport
    }

    // ── calls ────────────────────────────────────────────────────────

    /// Perform one remote call, refreshing credentials once on auth failure.
    pub async fn call(
        &self,
        method_id: &str,
        params: &Value,
        source_path: Option<&str>,
        allow_null: bool,
    ) -> Result<Value> {
        let transport = &self.transport;
        match self.refresh {
            Some(ref coordinator) => {
                coordinator
                    .run(move |retry| {
                        transport.call_attempt(method_id, params, source_path, allow_null, retry)
                    })
                    .await
            }
            None => transport.call(method_id, params, source_path, allow_null).await,
        }
    }

    /// Several calls in one HTTP exchange. Only an exchange-level auth
    /// failure triggers a refresh; per-method errors are returned in the map.
    pub async fn call_batch(
        &self,
        requests: &[RpcRequest],
        source_path: Option<&str>,
    ) -> Result<BTreeMap<String, Result<Value>>> {
        let transport = &self.transport;
        match self.refresh {
            Some(ref coordinator) => {
                coordinator
                    .run(move |retry| transport.call_batch(requests, source_path, retry))
                    .await
            }
            None => transport.call_batch(requests, source_path, false).await,
        }
    }

    // ── job waits ────────────────────────────────────────────────────

    /// Wait for an uploaded source using the `[polling.sources]` settings.
    pub async fn wait_for_source_ready<F, Fut>(&self, check: F) -> Result<JobStatus>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus>>,
    {
        poller::wait_with(&self.polling.sources, check).await
    }

    /// Wait for a generated artifact using the `[polling.artifacts]` settings.
    pub async fn wait_for_artifact_ready<F, Fut>(&self, check: F) -> Result<JobStatus>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JobStatus>>,
    {
        poller::wait_with(&self.polling.artifacts, check).await
    }

    /// Wait for several artifacts at once; each keeps its own deadline.
    pub async fn wait_for_artifacts<F, Fut>(
        &self,
        task_ids: &[String],
        check: F,
    ) -> Vec<(String, Result<JobStatus>)>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<JobStatus>>,
    {
        poller::wait_for_many(task_ids, &self.polling.artifacts, check).await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("transport", &self.transport)
            .field("refresh", &self.refresh.is_some())
            .field("conversations", &self.conversations)
            .finish()
    }
}
