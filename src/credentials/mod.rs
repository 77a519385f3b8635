// credential acquisition and lifecycle: providers, cache, chain, refresher

pub mod cache;
pub mod chain;
pub mod irsa;
pub mod oidc;
pub mod refresher;
pub mod statics;
pub mod sts;
pub mod vault;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use cache::CredentialCache;
pub use chain::ProviderChain;

/// Short-lived AWS session credentials. Replaced atomically in the cache,
/// never mutated in place.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Absent for long-lived (static) credentials.
    pub session_token: Option<String>,
    /// Absent for credentials that do not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A source of session credentials. `refresh` performs the identity-source
/// round trip; memoization and stampede control live in the chain and cache.
#[async_trait]
pub trait ProvideSessionCredentials: Send + Sync {
    /// Stable identity of this provider, also its cache key.
    fn name(&self) -> &'static str;

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError>;
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("request to '{url}' returned status {status}")]
    UpstreamHttp { url: String, status: u16 },
    #[error("circuit breaker '{name}' is open")]
    BreakerOpen { name: &'static str },
    #[error("failed reading web identity token file {path}: {source}")]
    TokenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sts assume-role-with-web-identity failed: {0}")]
    Sts(String),
    #[error("no credentials available from any provider")]
    NoCredentialsAvailable,
    #[error("credentials provider '{name}' unavailable: {reason}")]
    ProviderUnavailable { name: &'static str, reason: String },
    #[error("credential process failed: {0}")]
    CredentialProcess(String),
    #[error("invalid json payload for '{url}': {source}")]
    Serialize {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl CredentialsError {
    /// Errors the chain skips quietly instead of logging as real failures.
    pub fn is_transient_skip(&self) -> bool {
        matches!(
            self,
            CredentialsError::BreakerOpen { .. } | CredentialsError::ProviderUnavailable { .. }
        )
    }
}
