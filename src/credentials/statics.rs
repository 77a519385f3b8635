//! Static-tier providers: environment variables, the shared credentials
//! file, and an external credential process. These sit ahead of the dynamic
//! provider in the chain and report `ProviderUnavailable` when their source
//! is simply not configured, so the chain walks past them quietly.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ini::Ini;
use serde::Deserialize;

use super::{CredentialsError, ProvideSessionCredentials, SessionCredentials};

fn unavailable(name: &'static str, reason: impl Into<String>) -> CredentialsError {
    CredentialsError::ProviderUnavailable {
        name,
        reason: reason.into(),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` / `AWS_SESSION_TOKEN`.
pub struct EnvironmentProvider;

#[async_trait]
impl ProvideSessionCredentials for EnvironmentProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        let access_key_id = non_empty_env("AWS_ACCESS_KEY_ID")
            .ok_or_else(|| unavailable(self.name(), "AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| unavailable(self.name(), "AWS_SECRET_ACCESS_KEY is not set"))?;
        Ok(SessionCredentials {
            access_key_id,
            secret_access_key,
            session_token: non_empty_env("AWS_SESSION_TOKEN"),
            expires_at: None,
        })
    }
}

fn credentials_file_path() -> Option<PathBuf> {
    if let Some(path) = non_empty_env("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".aws").join("credentials"))
}

fn profile_name() -> String {
    non_empty_env("AWS_PROFILE").unwrap_or_else(|| "default".to_string())
}

async fn load_credentials_file(name: &'static str) -> Result<Ini, CredentialsError> {
    let path = credentials_file_path()
        .ok_or_else(|| unavailable(name, "home directory could not be resolved"))?;
    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| unavailable(name, format!("{}: {e}", path.display())))?;
    Ini::load_from_str(&content).map_err(|e| unavailable(name, format!("{}: {e}", path.display())))
}

/// `~/.aws/credentials` (or `AWS_SHARED_CREDENTIALS_FILE`), profile from
/// `AWS_PROFILE` falling back to `default`.
pub struct SharedCredentialsFileProvider;

#[async_trait]
impl ProvideSessionCredentials for SharedCredentialsFileProvider {
    fn name(&self) -> &'static str {
        "shared-credentials-file"
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        let ini = load_credentials_file(self.name()).await?;
        let profile = profile_name();
        let section = ini
            .section(Some(profile.as_str()))
            .ok_or_else(|| unavailable(self.name(), format!("profile '{profile}' not found")))?;

        let access_key_id = section
            .get("aws_access_key_id")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| unavailable(self.name(), format!("profile '{profile}' has no aws_access_key_id")))?;
        let secret_access_key = section
            .get("aws_secret_access_key")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| unavailable(self.name(), format!("profile '{profile}' has no aws_secret_access_key")))?;

        Ok(SessionCredentials {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: section
                .get("aws_session_token")
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string),
            expires_at: None,
        })
    }
}

/// Output contract of an external credential process.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessCredentials {
    version: u32,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

/// Runs the `credential_process` command declared in the shared credentials
/// file and parses its JSON output.
pub struct CredentialProcessProvider;

#[async_trait]
impl ProvideSessionCredentials for CredentialProcessProvider {
    fn name(&self) -> &'static str {
        "credential-process"
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        let ini = load_credentials_file(self.name()).await?;
        let profile = profile_name();
        let command = ini
            .section(Some(profile.as_str()))
            .and_then(|section| section.get("credential_process"))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                unavailable(self.name(), format!("profile '{profile}' declares no credential_process"))
            })?
            .to_string();

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .map_err(|e| CredentialsError::CredentialProcess(format!("'{command}': {e}")))?;
        if !output.status.success() {
            return Err(CredentialsError::CredentialProcess(format!(
                "'{command}' exited with {}",
                output.status
            )));
        }

        let parsed: ProcessCredentials = serde_json::from_slice(&output.stdout)
            .map_err(|e| CredentialsError::CredentialProcess(format!("invalid output: {e}")))?;
        if parsed.version != 1 {
            return Err(CredentialsError::CredentialProcess(format!(
                "unsupported version {}",
                parsed.version
            )));
        }

        Ok(SessionCredentials {
            access_key_id: parsed.access_key_id,
            secret_access_key: parsed.secret_access_key,
            session_token: parsed.session_token.filter(|t| !t.is_empty()),
            expires_at: parsed.expiration,
        })
    }
}
