use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::circuitbreaker::BreakerSettings;

const ENV_PREFIX: &str = "ASP_";

pub const DEFAULT_REGION: &str = "eu-central-1";
/// Where EKS projects the web identity token when none is configured.
pub const DEFAULT_TOKEN_FILE: &str = "/var/run/secrets/eks.amazonaws.com/serviceaccount/token";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required key {0} missing value")]
    MissingKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("unknown credentials provider '{0}' (valid values: oidc, irsa, vault, or empty for static)")]
    UnknownProvider(String),
    #[error("invalid target url '{url}': {reason}")]
    InvalidTargetUrl { url: String, reason: String },
}

/// Which identity source backs the dynamic tail of the provider chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    Static,
    Oidc,
    Irsa,
    Vault,
}

/// Runtime configuration, sourced from `ASP_`-prefixed environment variables.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub target_url: Url,
    pub port: u16,
    pub mgmt_port: u16,
    pub service: String,
    pub region: String,
    pub credentials_provider: ProviderMode,
    pub role_arn: String,
    pub session_name: String,
    pub open_id_auth_server_url: String,
    pub open_id_client_id: String,
    pub open_id_client_secret: String,
    pub async_credentials_fetch: bool,
    pub token_file_path: PathBuf,
    pub vault_url: String,
    pub vault_auth_token: String,
    pub vault_credentials_path: String,
    pub flush_interval: Duration,
    pub idle_conn_timeout: Duration,
    pub dial_timeout: Duration,
    pub metrics_path: String,
    pub breaker: BreakerSettings,
    pub freshness_skew: Duration,
}

impl ProxyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let target_raw = required("TARGET_URL")?;
        let target_url = Url::parse(&target_raw).map_err(|e| ConfigError::InvalidTargetUrl {
            url: target_raw.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(target_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidTargetUrl {
                url: target_raw.clone(),
                reason: "scheme must be http or https".into(),
            });
        }
        if target_url.host_str().is_none() {
            return Err(ConfigError::InvalidTargetUrl {
                url: target_raw,
                reason: "missing host".into(),
            });
        }

        let credentials_provider = match optional("CREDENTIALS_PROVIDER").as_deref() {
            None => ProviderMode::Static,
            Some("oidc") => ProviderMode::Oidc,
            Some("irsa") => ProviderMode::Irsa,
            Some("vault") => ProviderMode::Vault,
            Some(other) => return Err(ConfigError::UnknownProvider(other.to_string())),
        };

        let config = Self {
            target_url,
            port: parsed("PORT", 8080u16)?,
            mgmt_port: parsed("MGMT_PORT", 8081u16)?,
            service: string("SERVICE", "es"),
            region: region(),
            credentials_provider,
            role_arn: string("ROLE_ARN", ""),
            session_name: string("SESSION_NAME", "aws-signing-proxy"),
            open_id_auth_server_url: string("OPEN_ID_AUTH_SERVER_URL", ""),
            open_id_client_id: string("OPEN_ID_CLIENT_ID", ""),
            open_id_client_secret: string("OPEN_ID_CLIENT_SECRET", ""),
            async_credentials_fetch: boolean("ASYNC_OPEN_ID_CREDENTIALS_FETCH"),
            token_file_path: token_file_path(),
            vault_url: string("VAULT_URL", ""),
            vault_auth_token: string("VAULT_AUTH_TOKEN", ""),
            vault_credentials_path: string("VAULT_CREDENTIALS_PATH", ""),
            flush_interval: duration("FLUSH_INTERVAL", Duration::ZERO)?,
            idle_conn_timeout: duration("IDLE_CONN_TIMEOUT", Duration::from_secs(90))?,
            dial_timeout: duration("DIAL_TIMEOUT", Duration::from_secs(30))?,
            metrics_path: metrics_path()?,
            breaker: BreakerSettings {
                failure_threshold: parsed("BREAKER_FAILURE_THRESHOLD", 5u32)?,
                open_timeout: duration("BREAKER_OPEN_TIMEOUT", Duration::from_secs(60))?,
            },
            freshness_skew: Duration::from_secs(parsed("CREDENTIALS_FRESHNESS_SKEW", 300u64)?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.credentials_provider {
            ProviderMode::Static => {}
            ProviderMode::Oidc => {
                require_set("OPEN_ID_AUTH_SERVER_URL", &self.open_id_auth_server_url)?;
                require_set("OPEN_ID_CLIENT_ID", &self.open_id_client_id)?;
                require_set("OPEN_ID_CLIENT_SECRET", &self.open_id_client_secret)?;
                require_set("ROLE_ARN", &self.role_arn)?;
            }
            ProviderMode::Irsa => {
                require_set("ROLE_ARN", &self.role_arn)?;
            }
            ProviderMode::Vault => {
                require_set("VAULT_URL", &self.vault_url)?;
                require_set("VAULT_CREDENTIALS_PATH", &self.vault_credentials_path)?;
                require_set("VAULT_AUTH_TOKEN", &self.vault_auth_token)?;
            }
        }
        Ok(())
    }
}

fn full_key(key: &str) -> String {
    format!("{ENV_PREFIX}{key}")
}

fn optional(key: &str) -> Option<String> {
    std::env::var(full_key(key))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, ConfigError> {
    optional(key).ok_or_else(|| ConfigError::MissingKey(full_key(key)))
}

fn require_set(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingKey(full_key(key)));
    }
    Ok(())
}

fn string(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn boolean(key: &str) -> bool {
    matches!(optional(key).as_deref(), Some("1" | "true" | "yes" | "on"))
}

fn parsed<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: full_key(key),
            reason: e.to_string(),
        }),
    }
}

fn duration(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(key) {
        None => Ok(default),
        Some(raw) => parse_duration(&raw).map_err(|reason| ConfigError::InvalidValue {
            key: full_key(key),
            reason,
        }),
    }
}

/// Accepts `300ms`, `90s`, `5m`, or a bare number of seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    fn number(raw: &str) -> Result<u64, String> {
        raw.trim()
            .parse()
            .map_err(|_| format!("'{raw}' is not a number"))
    }

    let raw = raw.trim();
    if let Some(millis) = raw.strip_suffix("ms") {
        return number(millis).map(Duration::from_millis);
    }
    if let Some(secs) = raw.strip_suffix('s') {
        return number(secs).map(Duration::from_secs);
    }
    if let Some(mins) = raw.strip_suffix('m') {
        return number(mins).map(|v| Duration::from_secs(v * 60));
    }
    number(raw).map(Duration::from_secs)
}

fn region() -> String {
    optional("REGION")
        .or_else(|| {
            std::env::var("AWS_REGION")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

fn token_file_path() -> PathBuf {
    optional("TOKEN_FILE_PATH")
        .or_else(|| {
            std::env::var("AWS_WEB_IDENTITY_TOKEN_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE))
}

fn metrics_path() -> Result<String, ConfigError> {
    let path = string("METRICS_PATH", "/status/metrics");
    if !path.starts_with('/') {
        return Err(ConfigError::InvalidValue {
            key: full_key("METRICS_PATH"),
            reason: "must start with '/'".into(),
        });
    }
    Ok(path)
}
