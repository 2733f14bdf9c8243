use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch-RPC transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Scheme + host of the web application (no trailing slash needed).
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Path of the batch-RPC endpoint on `base_url`.
    #[serde(default = "d_endpoint_path")]
    pub endpoint_path: String,
    /// Default `source-path` query parameter when a call gives none.
    #[serde(default = "d_source_path")]
    pub source_path: String,
    /// Per-call timeout.
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,
    /// Wait after a successful credential refresh before resubmitting.
    #[serde(default = "d_200")]
    pub settle_delay_ms: u64,
    /// Optional `bl` (server build label) query parameter.
    #[serde(default)]
    pub build_label: Option<String>,
    /// Optional `hl` (interface language) query parameter.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            endpoint_path: d_endpoint_path(),
            source_path: d_source_path(),
            timeout_ms: 30_000,
            settle_delay_ms: 200,
            build_label: None,
            language: None,
            user_agent: d_user_agent(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "https://notebooklm.google.com".into()
}
fn d_endpoint_path() -> String {
    "/_/LabsTailwindUi/data/batchexecute".into()
}
fn d_source_path() -> String {
    "/".into()
}
fn d_30000() -> u64 {
    30_000
}
fn d_200() -> u64 {
    200
}
fn d_user_agent() -> String {
    concat!("batchrpc/", env!("CARGO_PKG_VERSION")).into()
}
