//! HTTP transport for the batch-RPC endpoint.
//!
//! `RpcTransport` owns the open/closed lifecycle and one `reqwest::Client`,
//! attaches the current credentials to each call, enforces the per-call
//! timeout and classifies HTTP failures. Bodies are encoded and decoded by
//! [`crate::codec`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use br_domain::config::TransportConfig;
use br_domain::credentials::CredentialSet;
use br_domain::error::{Error, Result, RpcContext};
use br_domain::trace::TraceEvent;
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, COOKIE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::codec::{self, RpcRequest};
use crate::credentials::CredentialStore;
use crate::util::{from_reqwest, parse_retry_after};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";

/// Routing tag telling the server to answer in chunked mode.
const ROUTING_TAG: &str = "c";

/// First `_reqid`; each call adds [`REQ_ID_STEP`].
const REQ_ID_BASE: u64 = 100_000;
const REQ_ID_STEP: u64 = 100_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Batch-RPC transport bound to one web application.
///
/// Created once and reused for the lifetime of the process. Calls fail
/// with [`Error::NotOpen`] before [`open`](Self::open) and after
/// [`close`](Self::close).
pub struct RpcTransport {
    http: RwLock<Option<Client>>,
    cfg: TransportConfig,
    credentials: Arc<CredentialStore>,
    timeout: Duration,
    next_req_id: AtomicU64,
}

impl RpcTransport {
    pub fn new(cfg: &TransportConfig, credentials: Arc<CredentialStore>) -> Self {
        Self {
            http: RwLock::new(None),
            cfg: cfg.clone(),
            credentials,
            timeout: Duration::from_millis(cfg.timeout_ms),
            next_req_id: AtomicU64::new(REQ_ID_BASE),
        }
    }

    /// The configured per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Build the HTTP client. Opening an open transport is a no-op.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.http.write();
        if slot.is_some() {
            return Ok(());
        }
        let http = Client::builder()
            .user_agent(&self.cfg.user_agent)
            .build()
            .map_err(|e| Error::Network {
                message: format!("building HTTP client: {e}"),
                method_id: None,
            })?;
        *slot = Some(http);
        tracing::info!(base_url = %self.cfg.base_url, "rpc transport opened");
        Ok(())
    }

    /// Drop the HTTP client. Later calls fail until `open()` runs again.
    pub fn close(&self) {
        if self.http.write().take().is_some() {
            tracing::info!(base_url = %self.cfg.base_url, "rpc transport closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.http.read().is_some()
    }

    // ── calls ────────────────────────────────────────────────────────

    /// Perform one remote call and decode its result.
    pub async fn call(
        &self,
        method_id: &str,
        params: &Value,
        source_path: Option<&str>,
        allow_null: bool,
    ) -> Result<Value> {
        self.call_attempt(method_id, params, source_path, allow_null, false)
            .await
    }

    /// Like [`call`](Self::call); `retry` marks a resubmission after a
    /// credential refresh.
    pub async fn call_attempt(
        &self,
        method_id: &str,
        params: &Value,
        source_path: Option<&str>,
        allow_null: bool,
        retry: bool,
    ) -> Result<Value> {
        let request = RpcRequest::new(method_id, params.clone());
        let raw = self
            .exchange(std::slice::from_ref(&request), source_path, retry)
            .await?;
        codec::decode(&raw, method_id, allow_null)
    }

    /// Send several calls in one HTTP exchange.
    ///
    /// HTTP-level failures fail the whole batch; protocol errors are
    /// reported per method id.
    pub async fn call_batch(
        &self,
        requests: &[RpcRequest],
        source_path: Option<&str>,
        retry: bool,
    ) -> Result<BTreeMap<String, Result<Value>>> {
        if requests.is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw = self.exchange(requests, source_path, retry).await?;
        let ids: Vec<&str> = requests.iter().map(|r| r.method_id.as_str()).collect();
        codec::decode_all(&raw, &ids)
    }

    // ── request helpers ──────────────────────────────────────────────

    fn url(&self) -> String {
        format!(
            "{}{}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.endpoint_path
        )
    }

    fn query(
        &self,
        rpcids: &str,
        source_path: Option<&str>,
        creds: &CredentialSet,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("rpcids", rpcids.to_owned()),
            (
                "source-path",
                source_path.unwrap_or(&self.cfg.source_path).to_owned(),
            ),
        ];
        if let Some(sid) = creds.session_id() {
            query.push(("f.sid", sid.to_owned()));
        }
        if let Some(ref bl) = self.cfg.build_label {
            query.push(("bl", bl.clone()));
        }
        if let Some(ref hl) = self.cfg.language {
            query.push(("hl", hl.clone()));
        }
        let req_id = self.next_req_id.fetch_add(REQ_ID_STEP, Ordering::Relaxed);
        query.push(("_reqid", req_id.to_string()));
        query.push(("rt", ROUTING_TAG.to_owned()));
        query
    }

    /// Attach the form content type and the credential headers.
    fn decorate(&self, rb: RequestBuilder, creds: &CredentialSet) -> RequestBuilder {
        let mut rb = rb
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header("X-Same-Domain", "1");
        if !creds.cookie_header().is_empty() {
            rb = rb.header(COOKIE, creds.cookie_header());
        }
        rb
    }

    /// Run one HTTP exchange and return the raw response body.
    async fn exchange(
        &self,
        requests: &[RpcRequest],
        source_path: Option<&str>,
        retry: bool,
    ) -> Result<String> {
        let http = self.client()?;
        let creds = self.credentials.snapshot();

        let rpcids = requests
            .iter()
            .map(|r| r.method_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let body = match requests {
            [single] => codec::encode(&single.method_id, &single.params, creds.csrf_token()),
            many => codec::encode_batch(many, creds.csrf_token()),
        };

        let rb = self
            .decorate(http.post(self.url()), &creds)
            .query(&self.query(&rpcids, source_path, &creds))
            .body(body);

        tracing::debug!(rpcids = %rpcids, retry, "sending batch-rpc request");

        let start = Instant::now();
        let exchange = async {
            let resp = rb.send().await?;
            let status = resp.status();
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let text = resp.text().await?;
            Ok::<_, reqwest::Error>((status, retry_after, text))
        };
        let result = tokio::time::timeout(self.timeout, exchange).await;
        let elapsed = start.elapsed();

        let (status, outcome) = match result {
            Err(_) => (
                0,
                Err(Error::Timeout {
                    message: format!("no response within {}ms", self.timeout.as_millis()),
                    method_id: Some(rpcids.clone()),
                    elapsed_secs: elapsed.as_secs_f64(),
                    last_status: None,
                }),
            ),
            Ok(Err(e)) => (
                e.status().map(|s| s.as_u16()).unwrap_or(0),
                Err(from_reqwest(e, &rpcids, elapsed)),
            ),
            Ok(Ok((status, retry_after, text))) => {
                let outcome = if status.is_client_error() || status.is_server_error() {
                    Err(classify_status(status, retry_after.as_deref(), &text, &rpcids))
                } else {
                    Ok(text)
                };
                (status.as_u16(), outcome)
            }
        };

        TraceEvent::RpcCall {
            method_ids: rpcids.clone(),
            status,
            duration_ms: elapsed.as_millis() as u64,
            retry,
            error: outcome.as_ref().err().map(Error::kind),
        }
        .emit();

        if let Err(ref e) = outcome {
            tracing::debug!(rpcids = %rpcids, error = %e, "batch-rpc exchange failed");
        }
        outcome
    }

    fn client(&self) -> Result<Client> {
        self.http.read().clone().ok_or_else(|| {
            Error::NotOpen("call open() before issuing calls, and not after close()".into())
        })
    }
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("url", &self.url())
            .field("open", &self.is_open())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Map an HTTP error status to its classified error.
///
/// 401/403 come back as recoverable [`Error::Auth`] so the refresh
/// coordinator can intercept them.
fn classify_status(
    status: StatusCode,
    retry_after: Option<&str>,
    body: &str,
    rpcids: &str,
) -> Error {
    let ctx = RpcContext::new(format!("HTTP {}", status.as_u16()))
        .method(rpcids)
        .raw(body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimit {
            ctx,
            retry_after: parse_retry_after(retry_after),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth {
            ctx,
            recoverable: true,
        },
        s if s.is_server_error() => Error::Server {
            ctx,
            status: s.as_u16(),
        },
        s => Error::Client {
            ctx,
            status: s.as_u16(),
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use br_domain::error::ErrorKind;
    use std::collections::BTreeMap;

    fn transport() -> RpcTransport {
        let creds = CredentialSet::new(BTreeMap::new(), None, None);
        RpcTransport::new(
            &TransportConfig::default(),
            Arc::new(CredentialStore::new(creds)),
        )
    }

    #[tokio::test]
    async fn call_before_open_is_usage_error() {
        let t = transport();
        let err = t
            .call("abc", &serde_json::json!([]), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotOpen);
        assert!(!err.is_network());
    }

    #[tokio::test]
    async fn call_after_close_is_usage_error() {
        let t = transport();
        t.open().unwrap();
        assert!(t.is_open());
        t.close();
        assert!(!t.is_open());
        let err = t
            .call("abc", &serde_json::json!([]), None, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotOpen);
    }

    #[test]
    fn status_classification() {
        let rl = classify_status(StatusCode::TOO_MANY_REQUESTS, Some("12"), "slow down", "abc");
        assert_eq!(rl.kind(), ErrorKind::RateLimit);
        assert_eq!(rl.retry_after(), Some(12));

        let auth = classify_status(StatusCode::FORBIDDEN, None, "", "abc");
        assert!(auth.is_auth_candidate());

        let server = classify_status(StatusCode::BAD_GATEWAY, None, "", "abc");
        assert_eq!(server.http_status(), Some(502));
        assert!(server.is_retryable());

        let client = classify_status(StatusCode::NOT_FOUND, None, "", "abc");
        assert_eq!(client.kind(), ErrorKind::Client);
        assert!(!client.is_retryable());
    }

    #[test]
    fn url_joins_base_and_endpoint() {
        let t = transport();
        assert!(t.url().starts_with("https://"));
        assert!(t.url().ends_with("/data/batchexecute"));
    }

    #[test]
    fn req_id_increases_per_call() {
        let t = transport();
        let creds = CredentialSet::new(BTreeMap::new(), None, Some("sid-1".into()));
        let first = t.query("abc", None, &creds);
        let second = t.query("abc", Some("/notebook/1"), &creds);

        fn req_id(q: &[(&'static str, String)]) -> u64 {
            q.iter()
                .find(|(k, _)| *k == "_reqid")
                .map(|(_, v)| v.parse::<u64>().unwrap())
                .unwrap()
        }
        assert!(req_id(&second) > req_id(&first));
        assert!(first.contains(&("f.sid", "sid-1".to_string())));
        assert!(second.contains(&("source-path", "/notebook/1".to_string())));
        assert!(first.contains(&("rt", "c".to_string())));
    }
}
