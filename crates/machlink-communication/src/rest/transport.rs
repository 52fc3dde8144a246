//! HTTP transport for the REST firmware

use async_trait::async_trait;
use machlink_core::{ConnectionError, Result};
use std::time::Duration;

/// Status and body of one HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl HttpResponse {
    /// 200 response with `body`
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Stateless request channel to the firmware's web server
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `path` with query parameters
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse>;

    /// POST `body` to `path` with query parameters
    async fn post(&self, path: &str, query: &[(&str, &str)], body: Vec<u8>) -> Result<HttpResponse>;
}

/// [`HttpTransport`] over a `reqwest` client
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Client for `http://host:port` with a per-request timeout
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::InvalidParameters {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: format!("http://{}:{}", host, port),
            timeout,
        })
    }

    /// Base URL requests are made against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_error(&self, error: reqwest::Error) -> ConnectionError {
        if error.is_timeout() {
            ConnectionError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if error.is_connect() {
            ConnectionError::Refused {
                endpoint: self.base_url.clone(),
                reason: error.to_string(),
            }
        } else {
            ConnectionError::Http {
                reason: error.to_string(),
            }
        }
    }

    async fn finish(&self, response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        Ok(HttpResponse { status, body })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.finish(response).await
    }

    async fn post(&self, path: &str, query: &[(&str, &str)], body: Vec<u8>) -> Result<HttpResponse> {
        let response = self
            .client
            .post(self.url(path))
            .query(query)
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        self.finish(response).await
    }
}
