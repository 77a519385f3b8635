use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, SignableBody, SignableRequest, SigningSettings,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;

use crate::credentials::SessionCredentials;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("building signing parameters failed: {0}")]
    Params(String),
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("signer produced an invalid header: {0}")]
    InvalidHeader(String),
}

/// SigV4 collaborator. Signs `{method, url, host, body}` with the current
/// session credentials and returns the headers to graft onto the outbound
/// request: `Authorization`, `X-Amz-Date`, `X-Amz-Content-Sha256`, and
/// `X-Amz-Security-Token` when a session token is present.
pub struct RequestSigner {
    service: String,
    region: String,
    settings: SigningSettings,
}

impl RequestSigner {
    pub fn new(service: impl Into<String>, region: impl Into<String>) -> Self {
        let mut settings = SigningSettings::default();
        // the payload hash always travels as an explicit header
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        Self {
            service: service.into(),
            region: region.into(),
            settings,
        }
    }

    pub fn sign(
        &self,
        method: &Method,
        url: &str,
        host: &str,
        body: &[u8],
        credentials: &SessionCredentials,
    ) -> Result<HeaderMap, SignerError> {
        let identity: Identity = Credentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            credentials.expires_at.map(SystemTime::from),
            "aws-signing-proxy",
        )
        .into();

        let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name(&self.service)
            .time(SystemTime::now())
            .settings(self.settings.clone())
            .build()
            .map_err(|e| SignerError::Params(e.to_string()))?
            .into();

        // only the host header participates in the signature; everything the
        // signer itself adds is included automatically
        let headers = [("host", host)];
        let signable = SignableRequest::new(
            method.as_str(),
            url,
            headers.into_iter(),
            SignableBody::Bytes(body),
        )
        .map_err(|e| SignerError::Sign(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| SignerError::Sign(e.to_string()))?
            .into_parts();

        let mut signed = HeaderMap::new();
        for (name, value) in instructions.headers() {
            let name = HeaderName::try_from(name)
                .map_err(|e| SignerError::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| SignerError::InvalidHeader(e.to_string()))?;
            signed.insert(name, value);
        }
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use regex::Regex;

    const EMPTY_BODY_SHA256: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn credentials(session_token: Option<&str>) -> SessionCredentials {
        SessionCredentials {
            access_key_id: "FOO".into(),
            secret_access_key: "BAR".into(),
            session_token: session_token.map(str::to_string),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        }
    }

    #[test]
    fn empty_body_get_is_signed_with_the_well_known_hash() {
        let signer = RequestSigner::new("s3", "eu-central-1");
        let headers = signer
            .sign(
                &Method::GET,
                "http://bucket.example.com/",
                "bucket.example.com",
                &[],
                &credentials(Some("FOOBAR")),
            )
            .unwrap();

        assert_eq!(
            headers.get("x-amz-content-sha256").unwrap(),
            EMPTY_BODY_SHA256
        );
        assert_eq!(headers.get("x-amz-security-token").unwrap(), "FOOBAR");

        let authorization = headers.get("authorization").unwrap().to_str().unwrap();
        let pattern = Regex::new(
            r"^AWS4-HMAC-SHA256 Credential=FOO/[0-9]{8}/eu-central-1/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token, Signature=[0-9a-f]{64}$",
        )
        .unwrap();
        assert!(
            pattern.is_match(authorization),
            "authorization header did not match: {authorization}"
        );
    }

    #[test]
    fn body_hash_covers_the_actual_payload() {
        let signer = RequestSigner::new("es", "eu-central-1");
        let headers = signer
            .sign(
                &Method::POST,
                "http://search.example.com/index/_doc",
                "search.example.com",
                br#"{"query":{}}"#,
                &credentials(Some("FOOBAR")),
            )
            .unwrap();

        let hash = headers.get("x-amz-content-sha256").unwrap();
        assert_ne!(hash, EMPTY_BODY_SHA256);
    }

    #[test]
    fn security_token_is_omitted_without_a_session_token() {
        let signer = RequestSigner::new("s3", "eu-central-1");
        let headers = signer
            .sign(
                &Method::GET,
                "http://bucket.example.com/",
                "bucket.example.com",
                &[],
                &credentials(None),
            )
            .unwrap();

        assert!(headers.get("x-amz-security-token").is_none());
        let authorization = headers.get("authorization").unwrap().to_str().unwrap();
        assert!(authorization.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date,"));
    }
}
