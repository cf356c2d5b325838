//! HTTP transport used by the cache on a miss.

use async_trait::async_trait;
use consult_core::{FetchError, FetchResult, HttpRequest, Method};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Issues one request against the backend and returns its JSON body.
///
/// Non-2xx answers must come back as [`FetchError::Status`].
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, request: &HttpRequest) -> FetchResult<Value>;
}

/// Settings for [`RestTransport`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub bearer_token: Option<String>,
}

/// Error body returned by the backend on failure.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// reqwest-backed transport against a fixed base origin.
#[derive(Clone)]
pub struct RestTransport {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestTransport {
    pub fn new(config: &RestConfig) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let auth_header = build_auth_headers(config.bearer_token.as_deref())?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    async fn parse_response(response: reqwest::Response) -> FetchResult<Value> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if status.is_success() {
            // 204 and other empty bodies carry no JSON.
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .ok()
            .or_else(|| (!text.trim().is_empty()).then(|| text.clone()));
        Err(FetchError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl HttpTransport for RestTransport {
    async fn send(&self, request: &HttpRequest) -> FetchResult<Value> {
        let url = self.resolve_url(&request.url);
        let mut builder = match request.method() {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Delete => self.client.delete(&url),
        }
        .headers(self.auth_header.clone());

        for (name, value) in &request.options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.options.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Self::parse_response(response).await
    }
}

fn build_auth_headers(bearer_token: Option<&str>) -> FetchResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(token) = bearer_token {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| FetchError::InvalidRequest(e.to_string()))?,
        );
    }
    Ok(headers)
}
