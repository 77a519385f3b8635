use async_trait::async_trait;
use aws_sdk_sts::config::{BehaviorVersion, Region};
use aws_smithy_types::error::display::DisplayErrorContext;

use super::{CredentialsError, SessionCredentials};

/// The STS exchange the web-identity providers delegate to. A trait seam so
/// tests can substitute a recording client.
#[async_trait]
pub trait AssumeRoleWithWebIdentity: Send + Sync {
    async fn assume_role_with_web_identity(
        &self,
        role_arn: &str,
        session_name: &str,
        web_identity_token: &str,
    ) -> Result<SessionCredentials, CredentialsError>;
}

pub struct StsClient {
    inner: aws_sdk_sts::Client,
}

impl StsClient {
    /// The exchange itself is unauthenticated, so the client carries a region
    /// and no ambient credentials.
    pub fn new(region: &str) -> Self {
        let config = aws_sdk_sts::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .build();
        Self {
            inner: aws_sdk_sts::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl AssumeRoleWithWebIdentity for StsClient {
    async fn assume_role_with_web_identity(
        &self,
        role_arn: &str,
        session_name: &str,
        web_identity_token: &str,
    ) -> Result<SessionCredentials, CredentialsError> {
        let output = self
            .inner
            .assume_role_with_web_identity()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .web_identity_token(web_identity_token)
            .send()
            .await
            .map_err(|err| CredentialsError::Sts(DisplayErrorContext(&err).to_string()))?;

        let credentials = output
            .credentials()
            .ok_or_else(|| CredentialsError::Sts("response carried no credentials".into()))?;

        let expiration = credentials.expiration();
        let expires_at =
            chrono::DateTime::from_timestamp(expiration.secs(), expiration.subsec_nanos())
                .ok_or_else(|| CredentialsError::Sts("invalid expiration timestamp".into()))?;

        Ok(SessionCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: Some(credentials.session_token().to_string())
                .filter(|token| !token.is_empty()),
            expires_at: Some(expires_at),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records every web identity token it is handed and returns fixed
    /// credentials.
    pub struct MockSts {
        pub tokens: Mutex<Vec<String>>,
        pub expires_in: chrono::Duration,
    }

    impl MockSts {
        pub fn new() -> Self {
            Self {
                tokens: Mutex::new(Vec::new()),
                expires_in: chrono::Duration::hours(1),
            }
        }
    }

    #[async_trait]
    impl AssumeRoleWithWebIdentity for MockSts {
        async fn assume_role_with_web_identity(
            &self,
            _role_arn: &str,
            _session_name: &str,
            web_identity_token: &str,
        ) -> Result<SessionCredentials, CredentialsError> {
            self.tokens
                .lock()
                .unwrap()
                .push(web_identity_token.to_string());
            Ok(SessionCredentials {
                access_key_id: "accessKeyId".into(),
                secret_access_key: "secretAccessKey".into(),
                session_token: Some("sessionToken".into()),
                expires_at: Some(Utc::now() + self.expires_in),
            })
        }
    }
}
