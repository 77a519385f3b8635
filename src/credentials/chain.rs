use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{CredentialCache, CredentialsError, ProvideSessionCredentials, SessionCredentials};

/// Ordered fallback over credential providers. The first provider with a
/// fresh cache entry or a successful refresh wins; a provider whose breaker
/// is open (or that is simply not configured in this environment) is skipped
/// and the chain moves on, so a failing auth server does not take the proxy
/// down while a static fallback exists.
pub struct ProviderChain {
    providers: Vec<Arc<dyn ProvideSessionCredentials>>,
    cache: Arc<CredentialCache>,
    // one refresh in flight per provider; late callers pick up the result
    refresh_locks: DashMap<&'static str, Arc<Mutex<()>>>,
}

impl ProviderChain {
    pub fn new(
        providers: Vec<Arc<dyn ProvideSessionCredentials>>,
        cache: Arc<CredentialCache>,
    ) -> Self {
        Self {
            providers,
            cache,
            refresh_locks: DashMap::new(),
        }
    }

    /// Current session credentials: a fresh cache hit short-circuits,
    /// otherwise the first provider whose refresh succeeds wins.
    pub async fn get(&self) -> Result<SessionCredentials, CredentialsError> {
        // the hot path: no provider is consulted while a fresh entry exists
        for provider in &self.providers {
            if let Some(credentials) = self.cache.load(provider.name()) {
                return Ok(credentials);
            }
        }

        for provider in &self.providers {
            match self.refresh_provider(provider.as_ref()).await {
                Ok(credentials) => return Ok(credentials),
                Err(err) if err.is_transient_skip() => {
                    tracing::debug!(provider = provider.name(), error = %err, "provider skipped");
                }
                Err(err) => {
                    tracing::warn!(provider = provider.name(), error = %err, "provider failed, trying next");
                }
            }
        }
        Err(CredentialsError::NoCredentialsAvailable)
    }

    /// Refresh the named provider unless its cache entry is still fresh.
    /// Used by the background refresher; shares the single-flight locks with
    /// the signing path.
    pub async fn refresh_stale(&self, name: &str) -> Result<(), CredentialsError> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.name() == name)
            .ok_or(CredentialsError::NoCredentialsAvailable)?;
        if self.cache.load(name).is_some() {
            return Ok(());
        }
        self.refresh_provider(provider.as_ref()).await.map(|_| ())
    }

    async fn refresh_provider(
        &self,
        provider: &dyn ProvideSessionCredentials,
    ) -> Result<SessionCredentials, CredentialsError> {
        let lock = self
            .refresh_locks
            .entry(provider.name())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // another caller may have completed this refresh while we waited
        if let Some(credentials) = self.cache.load(provider.name()) {
            return Ok(credentials);
        }

        let credentials = provider.refresh().await?;
        self.cache.store(provider.name(), credentials.clone());
        Ok(credentials)
    }
}
