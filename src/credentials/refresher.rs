use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::ProviderChain;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Background task that keeps the cache warm for one dynamic provider so the
/// signing path rarely refreshes inline. Errors are logged and the task keeps
/// ticking; backoff is the breaker's job.
pub struct AsyncRefresher {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AsyncRefresher {
    pub fn spawn(
        chain: Arc<ProviderChain>,
        provider_name: &'static str,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = chain.refresh_stale(provider_name).await {
                            tracing::error!(
                                provider = provider_name,
                                error = %err,
                                "background credentials refresh failed"
                            );
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });
        Self {
            shutdown_tx,
            handle,
        }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}
