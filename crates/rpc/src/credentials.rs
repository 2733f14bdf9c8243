//! Shared, atomically swappable credential state.

use std::sync::Arc;

use br_domain::credentials::CredentialSet;
use parking_lot::RwLock;

/// Holds the current [`CredentialSet`] for every in-flight call.
///
/// Readers take a cheap `Arc` snapshot; a refresh replaces the whole set in
/// one swap, so a concurrent call never observes a header from one set and
/// a CSRF token from another.
pub struct CredentialStore {
    current: RwLock<Arc<CredentialSet>>,
}

impl CredentialStore {
    pub fn new(initial: CredentialSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<CredentialSet> {
        Arc::clone(&self.current.read())
    }

    /// Replace the credentials in a single swap.
    pub fn apply(&self, next: CredentialSet) {
        *self.current.write() = Arc::new(next);
        tracing::debug!("credential set replaced");
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("current", &*self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn creds(sid: &str, csrf: &str) -> CredentialSet {
        let mut cookies = BTreeMap::new();
        cookies.insert("SID".to_string(), sid.to_string());
        CredentialSet::new(cookies, Some(csrf.into()), Some(format!("sess-{sid}")))
    }

    #[test]
    fn snapshot_survives_apply() {
        let store = CredentialStore::new(creds("old", "csrf-old"));
        let before = store.snapshot();

        store.apply(creds("new", "csrf-new"));
        let after = store.snapshot();

        // The old snapshot stays internally consistent.
        assert_eq!(before.cookie_header(), "SID=old");
        assert_eq!(before.csrf_token(), Some("csrf-old"));
        assert_eq!(after.cookie_header(), "SID=new");
        assert_eq!(after.session_id(), Some("sess-new"));
    }
}
