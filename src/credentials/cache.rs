use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;

use super::SessionCredentials;

pub const DEFAULT_FRESHNESS_SKEW: Duration = Duration::from_secs(300);

/// Process-wide memoization of the current session credentials, keyed by
/// provider identity. An entry within `skew` of its expiry counts as stale so
/// callers refresh ahead of real expiry.
pub struct CredentialCache {
    skew: chrono::Duration,
    entries: Mutex<HashMap<&'static str, SessionCredentials>>,
}

impl CredentialCache {
    pub fn new(skew: Duration) -> Self {
        let skew = chrono::Duration::from_std(skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_FRESHNESS_SKEW.as_secs() as i64));
        Self {
            skew,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The current entry for `key`, unless it is absent or stale.
    pub fn load(&self, key: &str) -> Option<SessionCredentials> {
        let entries = self.locked();
        let credentials = entries.get(key)?;
        match credentials.expires_at {
            Some(expires_at) if Utc::now() + self.skew >= expires_at => None,
            _ => Some(credentials.clone()),
        }
    }

    /// Atomic replace. A late writer never clobbers fresher credentials: an
    /// entry with an earlier expiry than the current one is dropped.
    pub fn store(&self, key: &'static str, credentials: SessionCredentials) {
        let mut entries = self.locked();
        if let Some(current) = entries.get(key) {
            if let (Some(new), Some(old)) = (credentials.expires_at, current.expires_at) {
                if new < old {
                    return;
                }
            }
        }
        entries.insert(key, credentials);
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<&'static str, SessionCredentials>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
