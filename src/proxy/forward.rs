use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use url::Url;

use crate::credentials::ProviderChain;

use super::signer::RequestSigner;
use super::upstream::UpstreamTransport;

/// Shared per-request state of the proxy listener.
#[derive(Clone)]
pub struct ProxyState {
    pub target: Arc<ForwardTarget>,
    pub chain: Arc<ProviderChain>,
    pub signer: Arc<RequestSigner>,
    pub upstream: Arc<UpstreamTransport>,
}

/// Scheme and authority every inbound request is rewritten to.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    scheme: String,
    authority: String,
}

impl ForwardTarget {
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Some(Self {
            scheme: url.scheme().to_string(),
            authority,
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn url_for(&self, path_and_query: &str) -> String {
        format!("{}://{}{}", self.scheme, self.authority, path_and_query)
    }
}

// Connection-scoped headers the reverse-proxy primitive never forwards.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// The per-request director: rewrite the target, buffer the body, acquire
/// credentials, sign, and forward. The client sees the upstream response
/// streamed back unchanged.
pub async fn handle(State(state): State<ProxyState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let url = state.target.url_for(&path_and_query);

    // SigV4 hashes the payload, so the body is buffered before anything is
    // sent upstream
    let body: Bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return plain_response(
                StatusCode::BAD_REQUEST,
                format!("failed reading request body: {err}"),
            )
        }
    };

    let credentials = match state.chain.get().await {
        Ok(credentials) => credentials,
        Err(err) => {
            tracing::error!(error = %err, "no credentials for inbound request");
            return plain_response(StatusCode::BAD_GATEWAY, "upstream credentials unavailable");
        }
    };

    let signed_headers = match state.signer.sign(
        &parts.method,
        &url,
        state.target.authority(),
        &body,
        &credentials,
    ) {
        Ok(headers) => headers,
        Err(err) => {
            tracing::error!(error = %err, "request signing failed");
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "request signing failed");
        }
    };

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        if name == header::HOST || name == header::CONTENT_LENGTH || is_hop_by_hop(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    // signed headers overwrite whatever the client sent under the same name
    for (name, value) in signed_headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    let upstream_response = match state
        .upstream
        .client()
        .request(parts.method.clone(), url.as_str())
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, url = %url, "upstream request failed");
            return plain_response(StatusCode::BAD_GATEWAY, "upstream request failed");
        }
    };

    let mut builder = Response::builder().status(upstream_response.status());
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream_response.headers().iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            response_headers.append(name.clone(), value.clone());
        }
    }
    builder
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .unwrap_or_else(|err| {
            plain_response(
                StatusCode::BAD_GATEWAY,
                format!("invalid upstream response: {err}"),
            )
        })
}

fn plain_response(status: StatusCode, message: impl Into<String>) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.into()))
        .unwrap_or_default()
}
