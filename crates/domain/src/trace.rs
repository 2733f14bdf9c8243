use serde::Serialize;

use crate::error::ErrorKind;
use crate::job::JobState;

/// Structured trace events emitted across all batch-RPC crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RpcCall {
        method_ids: String,
        status: u16,
        duration_ms: u64,
        retry: bool,
        error: Option<ErrorKind>,
    },
    ChunksSkipped {
        skipped: usize,
        total: usize,
    },
    AuthRefresh {
        succeeded: bool,
        waiters: usize,
        duration_ms: u64,
    },
    JobPolled {
        task_id: String,
        status: JobState,
        elapsed_ms: u64,
        next_interval_ms: u64,
    },
    ConversationEvicted {
        conversation_id: String,
        turns: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "br_event");
    }
}
