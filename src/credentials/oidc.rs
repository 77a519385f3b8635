use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::circuitbreaker::{BreakerError, BreakerSettings, CircuitBreaker};
use crate::rest::RestClient;

use super::sts::{AssumeRoleWithWebIdentity, StsClient};
use super::{CredentialsError, ProvideSessionCredentials, SessionCredentials};

#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub auth_server_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub role_arn: String,
    pub session_name: String,
    pub region: String,
}

/// Exchanges OAuth2 client credentials for an id token at the auth server,
/// then exchanges that token at STS for session credentials. The auth-server
/// call is guarded by the `oidc` breaker; an STS failure is surfaced as a
/// refresh failure, not retried here.
pub struct OidcProvider {
    settings: OidcSettings,
    auth_server: RestClient,
    sts: Arc<dyn AssumeRoleWithWebIdentity>,
    breaker: CircuitBreaker,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    identity: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "idToken")]
    id_token: String,
}

impl OidcProvider {
    pub fn new(settings: OidcSettings, http: reqwest::Client, breaker: BreakerSettings) -> Self {
        let sts = Arc::new(StsClient::new(&settings.region));
        Self::with_sts(settings, http, sts, breaker)
    }

    pub fn with_sts(
        settings: OidcSettings,
        http: reqwest::Client,
        sts: Arc<dyn AssumeRoleWithWebIdentity>,
        breaker: BreakerSettings,
    ) -> Self {
        let auth_server = RestClient::new(settings.auth_server_url.clone(), http);
        Self {
            settings,
            auth_server,
            sts,
            breaker: CircuitBreaker::with_settings("oidc", breaker),
        }
    }
}

#[async_trait]
impl ProvideSessionCredentials for OidcProvider {
    fn name(&self) -> &'static str {
        "oidc"
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        let request = TokenRequest {
            identity: &self.settings.client_id,
            secret: &self.settings.client_secret,
        };
        let response: TokenResponse = self
            .breaker
            .execute(|| self.auth_server.post("").json(&request).fetch())
            .await
            .map_err(|err| match err {
                BreakerError::Open => CredentialsError::BreakerOpen { name: "oidc" },
                BreakerError::Inner(inner) => inner,
            })?;

        let credentials = self
            .sts
            .assume_role_with_web_identity(
                &self.settings.role_arn,
                &self.settings.session_name,
                &response.id_token,
            )
            .await?;

        tracing::info!("refreshed short-lived credentials via oidc");
        Ok(credentials)
    }
}
