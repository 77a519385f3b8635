use std::sync::Arc;

use aws_signing_proxy::credentials::irsa::{IrsaProvider, IrsaSettings};
use aws_signing_proxy::credentials::oidc::{OidcProvider, OidcSettings};
use aws_signing_proxy::credentials::refresher::{AsyncRefresher, DEFAULT_REFRESH_INTERVAL};
use aws_signing_proxy::credentials::statics::{
    CredentialProcessProvider, EnvironmentProvider, SharedCredentialsFileProvider,
};
use aws_signing_proxy::credentials::vault::{VaultProvider, VaultSettings};
use aws_signing_proxy::credentials::{
    CredentialCache, ProvideSessionCredentials, ProviderChain,
};
use aws_signing_proxy::modules;
use aws_signing_proxy::modules::config::{ProviderMode, ProxyConfig};
use aws_signing_proxy::proxy::{
    ForwardTarget, ProxyState, RequestSigner, Server, TransportSettings, UpstreamTransport,
};

#[tokio::main]
async fn main() -> Result<(), String> {
    modules::logger::init_logger();

    let config = ProxyConfig::from_env().map_err(|e| format!("configuration error: {e}"))?;

    let target = ForwardTarget::from_url(&config.target_url)
        .ok_or_else(|| format!("target url '{}' has no host", config.target_url))?;

    // identity-provider calls share the transport timeouts of the proxy path
    let identity_http = reqwest::Client::builder()
        .connect_timeout(config.dial_timeout)
        .pool_idle_timeout(config.idle_conn_timeout)
        .build()
        .map_err(|e| format!("failed to build identity http client: {e}"))?;

    let cache = Arc::new(CredentialCache::new(config.freshness_skew));
    let (chain, dynamic_provider) = build_provider_chain(&config, identity_http, cache);
    let chain = Arc::new(chain);

    let refresher = match dynamic_provider {
        Some(name) if config.async_credentials_fetch => {
            tracing::info!(provider = name, "starting background credentials refresher");
            Some(AsyncRefresher::spawn(
                chain.clone(),
                name,
                DEFAULT_REFRESH_INTERVAL,
            ))
        }
        _ => None,
    };

    let upstream = UpstreamTransport::new(&TransportSettings {
        dial_timeout: config.dial_timeout,
        idle_conn_timeout: config.idle_conn_timeout,
        flush_interval: config.flush_interval,
    })
    .map_err(|e| format!("failed to build upstream http client: {e}"))?;

    let state = ProxyState {
        target: Arc::new(target),
        chain,
        signer: Arc::new(RequestSigner::new(
            config.service.clone(),
            config.region.clone(),
        )),
        upstream: Arc::new(upstream),
    };

    let (mgmt_server, mgmt_handle) = Server::start_mgmt(
        &format!("0.0.0.0:{}", config.mgmt_port),
        &config.metrics_path,
    )
    .await?;
    let (proxy_server, proxy_handle) =
        Server::start_proxy(&format!("0.0.0.0:{}", config.port), state).await?;

    tracing::info!(port = config.port, mgmt_port = config.mgmt_port, "listening");
    tracing::info!(
        target = %config.target_url,
        service = %config.service,
        region = %config.region,
        "forwarding traffic"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for shutdown signal: {e}"))?;

    tracing::info!("shutdown requested, stopping servers...");
    proxy_server.stop();
    mgmt_server.stop();
    if let Some(refresher) = refresher {
        refresher.shutdown().await;
    }
    let _ = proxy_handle.await;
    let _ = mgmt_handle.await;

    Ok(())
}

/// Static tier first, then exactly one dynamic provider per the configured
/// mode. Returns the dynamic provider's name so the refresher can target it.
fn build_provider_chain(
    config: &ProxyConfig,
    http: reqwest::Client,
    cache: Arc<CredentialCache>,
) -> (ProviderChain, Option<&'static str>) {
    let mut providers: Vec<Arc<dyn ProvideSessionCredentials>> = vec![
        Arc::new(EnvironmentProvider),
        Arc::new(SharedCredentialsFileProvider),
        Arc::new(CredentialProcessProvider),
    ];

    let dynamic = match config.credentials_provider {
        ProviderMode::Static => {
            tracing::warn!(
                "using static credentials is unsafe; consider a short-lived mechanism like IRSA, OIDC or Vault"
            );
            None
        }
        ProviderMode::Oidc => {
            tracing::info!(
                auth_server = %config.open_id_auth_server_url,
                "using credentials from oidc"
            );
            providers.push(Arc::new(OidcProvider::new(
                OidcSettings {
                    auth_server_url: config.open_id_auth_server_url.clone(),
                    client_id: config.open_id_client_id.clone(),
                    client_secret: config.open_id_client_secret.clone(),
                    role_arn: config.role_arn.clone(),
                    session_name: config.session_name.clone(),
                    region: config.region.clone(),
                },
                http,
                config.breaker,
            )));
            Some("oidc")
        }
        ProviderMode::Irsa => {
            tracing::info!(
                token_file = %config.token_file_path.display(),
                "using credentials from irsa"
            );
            providers.push(Arc::new(IrsaProvider::new(IrsaSettings {
                token_file_path: config.token_file_path.clone(),
                role_arn: config.role_arn.clone(),
                session_name: config.session_name.clone(),
                region: config.region.clone(),
            })));
            Some("irsa")
        }
        ProviderMode::Vault => {
            tracing::info!(
                vault_url = %config.vault_url,
                path = %config.vault_credentials_path,
                "using credentials from vault"
            );
            providers.push(Arc::new(VaultProvider::new(
                VaultSettings {
                    base_url: config.vault_url.clone(),
                    auth_token: config.vault_auth_token.clone(),
                    credentials_path: config.vault_credentials_path.clone(),
                },
                http,
                config.breaker,
            )));
            Some("vault")
        }
    };

    (ProviderChain::new(providers, cache), dynamic)
}
