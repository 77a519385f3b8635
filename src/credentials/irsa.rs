use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::sts::{AssumeRoleWithWebIdentity, StsClient};
use super::{CredentialsError, ProvideSessionCredentials, SessionCredentials};

#[derive(Debug, Clone)]
pub struct IrsaSettings {
    pub token_file_path: PathBuf,
    pub role_arn: String,
    pub session_name: String,
    pub region: String,
}

/// IAM Roles for Service Accounts: the platform projects a short-lived web
/// identity token into a file and rotates it, so the file is re-read on
/// every refresh and its contents are never cached.
pub struct IrsaProvider {
    settings: IrsaSettings,
    sts: Arc<dyn AssumeRoleWithWebIdentity>,
}

impl IrsaProvider {
    pub fn new(settings: IrsaSettings) -> Self {
        let sts = Arc::new(StsClient::new(&settings.region));
        Self::with_sts(settings, sts)
    }

    pub fn with_sts(settings: IrsaSettings, sts: Arc<dyn AssumeRoleWithWebIdentity>) -> Self {
        Self { settings, sts }
    }
}

#[async_trait]
impl ProvideSessionCredentials for IrsaProvider {
    fn name(&self) -> &'static str {
        "irsa"
    }

    async fn refresh(&self) -> Result<SessionCredentials, CredentialsError> {
        let token = tokio::fs::read_to_string(&self.settings.token_file_path)
            .await
            .map_err(|source| CredentialsError::TokenFile {
                path: self.settings.token_file_path.clone(),
                source,
            })?;

        let credentials = self
            .sts
            .assume_role_with_web_identity(
                &self.settings.role_arn,
                &self.settings.session_name,
                &token,
            )
            .await?;

        tracing::info!("refreshed short-lived credentials via irsa");
        Ok(credentials)
    }
}
