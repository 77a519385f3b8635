use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::circuitbreaker::{BreakerError, BreakerSettings, CircuitBreaker};
use crate::rest::RestClient;

use super::{CredentialsError, ProvideSessionCredentials, SessionCredentials};

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub base_url: String,
    pub auth_token: String,
    pub credentials_path: String,
}

/// Reads a Vault dynamic-AWS secret. The lease duration on the response
/// drives the cache expiry (`now + lease_duration`).
pub struct VaultProvider {
    settings: VaultSettings,
    rest: RestClient,
    breaker: CircuitBreaker,
}

/// Response of a dynamic-AWS secret read.
#[derive(Debug, Deserialize)]
pub struct RefreshLease {
    pub lease_duration: i64,
    pub data: LeaseData,
}

#[derive(Debug, Deserialize)]
pub struct LeaseData {
    pub access_key: String,
    pub secret_key: String,
    pub security_token: String,
}

impl VaultProvider {
    pub fn new(settings: VaultSettings, http: reqwest::Client, breaker: BreakerSettings) -> Self {
        let rest = RestClient::new(settings.base_url.clone(), http);
        Self {
            settings,
            rest,
            breaker: CircuitBreaker::with_settings("vault", breaker),
        }
    }
}

#[async_trait]
impl ProvideSessionCredentials for VaultProvider {
    fn name(&self) -> &'static str {
        "vault"
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        let path = format!(
            "v1/{}",
            self.settings.credentials_path.trim_start_matches('/')
        );
        let lease: RefreshLease = self
            .breaker
            .execute(|| {
                self.rest
                    .get(&path)
                    .header("X-Vault-Token", &self.settings.auth_token)
                    .fetch()
            })
            .await
            .map_err(|err| match err {
                BreakerError::Open => CredentialsError::BreakerOpen { name: "vault" },
                BreakerError::Inner(inner) => inner,
            })?;

        let expires_at = Utc::now() + chrono::Duration::seconds(lease.lease_duration);
        tracing::info!(lease_duration = lease.lease_duration, "refreshed short-lived credentials via vault");

        Ok(SessionCredentials {
            access_key_id: lease.data.access_key,
            secret_access_key: lease.data.secret_key,
            // iam_user-style leases carry no token
            session_token: Some(lease.data.security_token).filter(|token| !token.is_empty()),
            expires_at: Some(expires_at),
        })
    }
}

#[derive(Serialize)]
struct KubernetesLoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct KubernetesAuth {
    pub client_token: String,
    pub lease_duration: i64,
}

#[derive(Deserialize)]
struct KubernetesLoginResponse {
    auth: KubernetesAuth,
}

/// Bootstrap helper: exchange a Kubernetes service-account JWT for a Vault
/// client token via `POST /v1/auth/{method}/login`. Orthogonal to the
/// refresh cycle.
pub async fn kubernetes_auth_login(
    http: reqwest::Client,
    base_url: &str,
    auth_method: &str,
    role: &str,
    jwt: &str,
) -> Result<KubernetesAuth, CredentialsError> {
    let rest = RestClient::new(base_url, http);
    let response: KubernetesLoginResponse = rest
        .post(&format!("v1/auth/{auth_method}/login"))
        .json(&KubernetesLoginRequest { role, jwt })
        .fetch()
        .await?;
    Ok(response.auth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testlock;
    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn provider(addr: SocketAddr, breaker: BreakerSettings) -> VaultProvider {
        VaultProvider::new(
            VaultSettings {
                base_url: format!("http://{addr}"),
                auth_token: "vault-token".into(),
                credentials_path: "some-aws-engine/creds/some-aws-role".into(),
            },
            reqwest::Client::new(),
            breaker,
        )
    }

    #[tokio::test]
    async fn lease_drives_expiry_and_token_mapping() {
        let _guard = testlock::metrics();
        let seen_token: Arc<std::sync::Mutex<Option<String>>> = Arc::default();
        let recorded = seen_token.clone();

        let app = Router::new()
            .route(
                "/v1/some-aws-engine/creds/some-aws-role",
                get(
                    |State(recorded): State<Arc<std::sync::Mutex<Option<String>>>>,
                     headers: axum::http::HeaderMap| async move {
                        *recorded.lock().unwrap() = headers
                            .get("X-Vault-Token")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        Json(serde_json::json!({
                            "lease_duration": 3600,
                            "data": {
                                "access_key": "AK",
                                "secret_key": "SK",
                                "security_token": "ST"
                            }
                        }))
                    },
                ),
            )
            .with_state(recorded);
        let addr = serve(app).await;

        let before = Utc::now();
        let credentials = provider(addr, BreakerSettings::default())
            .refresh()
            .await
            .unwrap();

        assert_eq!(credentials.access_key_id, "AK");
        assert_eq!(credentials.secret_access_key, "SK");
        assert_eq!(credentials.session_token.as_deref(), Some("ST"));
        let expires_at = credentials.expires_at.unwrap();
        assert!(expires_at >= before + chrono::Duration::seconds(3599));
        assert!(expires_at <= Utc::now() + chrono::Duration::seconds(3601));
        assert_eq!(seen_token.lock().unwrap().as_deref(), Some("vault-token"));
    }

    #[tokio::test]
    async fn empty_security_token_is_dropped() {
        let _guard = testlock::metrics();
        let app = Router::new().route(
            "/v1/some-aws-engine/creds/some-aws-role",
            get(|| async {
                Json(serde_json::json!({
                    "lease_duration": 3600,
                    "data": { "access_key": "AK", "secret_key": "SK", "security_token": "" }
                }))
            }),
        );
        let addr = serve(app).await;

        let credentials = provider(addr, BreakerSettings::default())
            .refresh()
            .await
            .unwrap();
        assert!(credentials.session_token.is_none());
    }

    #[tokio::test]
    async fn vault_errors_trip_the_breaker() {
        let _guard = testlock::metrics();
        let app = Router::new().route(
            "/v1/some-aws-engine/creds/some-aws-role",
            get(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
        );
        let addr = serve(app).await;

        let provider = provider(
            addr,
            BreakerSettings {
                failure_threshold: 2,
                open_timeout: Duration::from_secs(60),
            },
        );
        for _ in 0..3 {
            assert!(matches!(
                provider.refresh().await.unwrap_err(),
                CredentialsError::UpstreamHttp { status: 503, .. }
            ));
        }
        assert!(matches!(
            provider.refresh().await.unwrap_err(),
            CredentialsError::BreakerOpen { name: "vault" }
        ));
    }

    #[tokio::test]
    async fn kubernetes_auth_login_exchanges_a_jwt() {
        let app = Router::new().route(
            "/v1/auth/kubernetes/login",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["role"], "dev-role");
                assert_eq!(body["jwt"], "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9");
                Json(serde_json::json!({
                    "auth": {
                        "client_token": "62b858f9-529c-6b26-e0b8-0457b6aacdb4",
                        "accessor": "afa306d0-be3d-c8d2-b0d7-2676e1c0d9b4",
                        "policies": ["default"],
                        "lease_duration": 2764800,
                        "renewable": true
                    }
                }))
            }),
        );
        let addr = serve(app).await;

        let auth = kubernetes_auth_login(
            reqwest::Client::new(),
            &format!("http://{addr}"),
            "kubernetes",
            "dev-role",
            "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9",
        )
        .await
        .unwrap();

        assert_eq!(auth.client_token, "62b858f9-529c-6b26-e0b8-0457b6aacdb4");
        assert_eq!(auth.lease_duration, 2764800);
    }
}
