//! Session credentials attached to every batch-RPC call.
//!
//! The `Cookie` header is always derived from the cookie mapping, so the two
//! can never drift apart. `Debug` is manually implemented to redact secrets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CredentialFields", into = "CredentialFields")]
pub struct CredentialSet {
    cookies: BTreeMap<String, String>,
    cookie_header: String,
    csrf_token: Option<String>,
    session_id: Option<String>,
}

/// On-the-wire shape; the header is rebuilt on deserialization.
#[derive(Serialize, Deserialize)]
struct CredentialFields {
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    csrf_token: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

impl From<CredentialFields> for CredentialSet {
    fn from(f: CredentialFields) -> Self {
        CredentialSet::new(f.cookies, f.csrf_token, f.session_id)
    }
}

impl From<CredentialSet> for CredentialFields {
    fn from(c: CredentialSet) -> Self {
        CredentialFields {
            cookies: c.cookies,
            csrf_token: c.csrf_token,
            session_id: c.session_id,
        }
    }
}

impl CredentialSet {
    pub fn new(
        cookies: BTreeMap<String, String>,
        csrf_token: Option<String>,
        session_id: Option<String>,
    ) -> Self {
        let cookie_header = render_cookie_header(&cookies);
        Self {
            cookies,
            cookie_header,
            csrf_token,
            session_id,
        }
    }

    /// Parse a raw `Cookie:` header value (`a=1; b=2`).
    pub fn from_cookie_header(
        header: &str,
        csrf_token: Option<String>,
        session_id: Option<String>,
    ) -> Result<Self> {
        let mut cookies = BTreeMap::new();
        for pair in header.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("malformed cookie pair: {pair}")))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Config("cookie with empty name".into()));
            }
            cookies.insert(name.to_owned(), value.trim().to_owned());
        }
        Ok(Self::new(cookies, csrf_token, session_id))
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn cookie_header(&self) -> &str {
        &self.cookie_header
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Insert or replace one cookie and rebuild the header.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
        self.cookie_header = render_cookie_header(&self.cookies);
    }

    pub fn with_tokens(mut self, csrf_token: Option<String>, session_id: Option<String>) -> Self {
        self.csrf_token = csrf_token;
        self.session_id = session_id;
        self
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.cookies.keys().map(String::as_str).collect();
        f.debug_struct("CredentialSet")
            .field("cookies", &names)
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "[REDACTED]"))
            .field("session_id", &self.session_id)
            .finish()
    }
}

fn render_cookie_header(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}
