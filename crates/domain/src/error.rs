//! Classified failures shared by every batch-RPC crate.
//!
//! Protocol-level variants carry an [`RpcContext`] so that a surfaced error
//! keeps the method id, a capped raw-response excerpt, the protocol code and
//! the method ids actually present in the response.

use std::fmt;

use crate::job::JobStatus;

/// Maximum number of characters of a raw response kept for diagnostics.
pub const RAW_EXCERPT_MAX_CHARS: usize = 500;

/// Substrings that mark a decode failure as a likely expired session.
pub const AUTH_FAILURE_MARKERS: &[&str] = &[
    "authentication",
    "expired",
    "unauthorized",
    "login",
    "re-authenticate",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Diagnostic context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Diagnostic fields attached to every protocol-level failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RpcContext {
    pub message: String,
    pub method_id: Option<String>,
    /// At most [`RAW_EXCERPT_MAX_CHARS`] characters of the raw body.
    pub raw_response: Option<String>,
    pub code: Option<String>,
    pub found_ids: Vec<String>,
}

impl RpcContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn method(mut self, method_id: impl Into<String>) -> Self {
        self.method_id = Some(method_id.into());
        self
    }

    /// Attach the raw response, truncated on a char boundary.
    pub fn raw(mut self, raw: &str) -> Self {
        self.raw_response = Some(excerpt(raw));
        self
    }

    pub fn code(mut self, code: impl ToString) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn found(mut self, ids: Vec<String>) -> Self {
        self.found_ids = ids;
        self
    }
}

impl fmt::Display for RpcContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(ref id) = self.method_id {
            write!(f, " (method {id})")?;
        }
        if let Some(ref code) = self.code {
            write!(f, " [code {code}]")?;
        }
        if !self.found_ids.is_empty() {
            write!(f, " found ids: {}", self.found_ids.join(", "))?;
        }
        Ok(())
    }
}

/// Truncate `raw` to [`RAW_EXCERPT_MAX_CHARS`] characters.
pub fn excerpt(raw: &str) -> String {
    match raw.char_indices().nth(RAW_EXCERPT_MAX_CHARS) {
        Some((idx, _)) => raw[..idx].to_owned(),
        None => raw.to_owned(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared error type used across all batch-RPC crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport-level failure (DNS, connect, reset). Not an HTTP status.
    #[error("network: {message}")]
    Network {
        message: String,
        method_id: Option<String>,
    },

    #[error("timeout after {elapsed_secs:.1}s: {message}")]
    Timeout {
        message: String,
        method_id: Option<String>,
        elapsed_secs: f64,
        /// Last job status observed by a poller, if any.
        last_status: Option<Box<JobStatus>>,
    },

    /// Protocol-level failure without a more specific classification.
    #[error("rpc: {ctx}")]
    Rpc { ctx: RpcContext, retryable: bool },

    #[error("rate limited: {ctx}")]
    RateLimit {
        ctx: RpcContext,
        retry_after: Option<u64>,
    },

    #[error("server error HTTP {status}: {ctx}")]
    Server { ctx: RpcContext, status: u16 },

    #[error("client error HTTP {status}: {ctx}")]
    Client { ctx: RpcContext, status: u16 },

    #[error("auth: {ctx}")]
    Auth { ctx: RpcContext, recoverable: bool },

    #[error("decoding: {ctx}")]
    Decoding { ctx: RpcContext },

    /// The response carried other method ids but not the requested one.
    #[error("unknown rpc method: {ctx}")]
    UnknownMethod { ctx: RpcContext },

    /// The transport was used before `open()` or after `close()`.
    #[error("transport not open: {0}")]
    NotOpen(String),

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used in logs and trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Rpc,
    RateLimit,
    Server,
    Client,
    Auth,
    Decoding,
    UnknownMethod,
    NotOpen,
    Config,
    Io,
    Json,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Rpc { .. } => ErrorKind::Rpc,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Server { .. } => ErrorKind::Server,
            Error::Client { .. } => ErrorKind::Client,
            Error::Auth { .. } => ErrorKind::Auth,
            Error::Decoding { .. } => ErrorKind::Decoding,
            Error::UnknownMethod { .. } => ErrorKind::UnknownMethod,
            Error::NotOpen(_) => ErrorKind::NotOpen,
            Error::Config(_) => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Json(_) => ErrorKind::Json,
        }
    }

    /// The diagnostic context, for protocol-level variants.
    pub fn context(&self) -> Option<&RpcContext> {
        match self {
            Error::Rpc { ctx, .. }
            | Error::RateLimit { ctx, .. }
            | Error::Server { ctx, .. }
            | Error::Client { ctx, .. }
            | Error::Auth { ctx, .. }
            | Error::Decoding { ctx }
            | Error::UnknownMethod { ctx } => Some(ctx),
            _ => None,
        }
    }

    /// Every protocol-level failure (the `RPCError` family).
    pub fn is_rpc(&self) -> bool {
        self.context().is_some()
    }

    /// Transport-level failures, including timeouts.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Timeout { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Decode failures, including method-id mismatches.
    pub fn is_decoding(&self) -> bool {
        matches!(self, Error::Decoding { .. } | Error::UnknownMethod { .. })
    }

    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::RateLimit { .. } | Error::Server { .. } => true,
            Error::Rpc { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Whether this failure should go through the credential refresh path.
    ///
    /// True for recoverable auth errors, and for decode errors whose message
    /// contains one of [`AUTH_FAILURE_MARKERS`].
    pub fn is_auth_candidate(&self) -> bool {
        match self {
            Error::Auth { recoverable, .. } => *recoverable,
            Error::Decoding { ctx } | Error::UnknownMethod { ctx } | Error::Rpc { ctx, .. } => {
                let message = ctx.message.to_lowercase();
                AUTH_FAILURE_MARKERS.iter().any(|m| message.contains(m))
            }
            _ => false,
        }
    }

    pub fn method_id(&self) -> Option<&str> {
        match self {
            Error::Network { method_id, .. } | Error::Timeout { method_id, .. } => {
                method_id.as_deref()
            }
            other => other.context().and_then(|c| c.method_id.as_deref()),
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.context().and_then(|c| c.code.as_deref())
    }

    pub fn raw_response(&self) -> Option<&str> {
        self.context().and_then(|c| c.raw_response.as_deref())
    }

    pub fn found_ids(&self) -> &[String] {
        self.context().map(|c| c.found_ids.as_slice()).unwrap_or(&[])
    }

    /// Seconds the server asked us to wait, for rate-limit errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Server { status, .. } | Error::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Protocol error codes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Known protocol status code with its canned message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCode {
    pub code: i64,
    pub message: &'static str,
    pub retryable: bool,
}

const PROTOCOL_CODES: &[ProtocolCode] = &[
    ProtocolCode {
        code: 3,
        message: "invalid argument",
        retryable: false,
    },
    ProtocolCode {
        code: 5,
        message: "resource not found",
        retryable: false,
    },
    ProtocolCode {
        code: 7,
        message: "permission denied",
        retryable: false,
    },
    ProtocolCode {
        code: 8,
        message: "resource exhausted (quota or rate limit)",
        retryable: true,
    },
    ProtocolCode {
        code: 9,
        message: "failed precondition",
        retryable: false,
    },
    ProtocolCode {
        code: 13,
        message: "internal server error",
        retryable: true,
    },
    ProtocolCode {
        code: 14,
        message: "service unavailable",
        retryable: true,
    },
    ProtocolCode {
        code: 16,
        message: "authentication required or session expired",
        retryable: false,
    },
];

/// Look up a protocol status code in the fixed table.
pub fn lookup_protocol_code(code: i64) -> Option<ProtocolCode> {
    PROTOCOL_CODES.iter().copied().find(|c| c.code == code)
}

/// Build the classified error for a protocol error entry.
///
/// Code 8 becomes [`Error::RateLimit`], code 16 a recoverable
/// [`Error::Auth`]; unmapped codes get a synthesized message but keep the
/// raw code.
pub fn from_protocol_code(code: i64, ctx: RpcContext) -> Error {
    let (message, retryable) = match lookup_protocol_code(code) {
        Some(known) => (known.message.to_owned(), known.retryable),
        None => (format!("unknown RPC error code {code}"), false),
    };
    let ctx = RpcContext {
        message,
        code: Some(code.to_string()),
        ..ctx
    };
    match code {
        8 => Error::RateLimit {
            ctx,
            retry_after: None,
        },
        16 => Error::Auth {
            ctx,
            recoverable: true,
        },
        _ => Error::Rpc { ctx, retryable },
    }
}
