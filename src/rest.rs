use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::credentials::CredentialsError;

/// Minimal typed JSON client for identity endpoints. Status codes >= 300 are
/// surfaced as [`CredentialsError::UpstreamHttp`]; the transport never
/// retries, retry policy belongs to callers.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn get(&self, path: &str) -> RestRequest<'_> {
        RestRequest::new(self, Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RestRequest<'_> {
        RestRequest::new(self, Method::POST, path)
    }

    fn url_for(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

pub struct RestRequest<'a> {
    client: &'a RestClient,
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    // serialization is deferred so builder chaining stays infallible
    body: Option<Result<Vec<u8>, serde_json::Error>>,
}

impl<'a> RestRequest<'a> {
    fn new(client: &'a RestClient, method: Method, path: &str) -> Self {
        Self {
            client,
            method,
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.body = Some(serde_json::to_vec(body));
        self
    }

    pub async fn fetch<T: DeserializeOwned>(self) -> Result<T, CredentialsError> {
        let url = self.client.url_for(&self.path);
        let mut request = self.client.http.request(self.method, &url);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = self.body {
            let bytes = body.map_err(|source| CredentialsError::Serialize {
                url: url.clone(),
                source,
            })?;
            request = request.header(CONTENT_TYPE, "application/json").body(bytes);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if status >= 300 {
            return Err(CredentialsError::UpstreamHttp { url, status });
        }
        Ok(response.json().await?)
    }
}
