//! HTTP Transport Port
//!
//! The network boundary of the request executor. The executor only ever
//! sees `RawResponse` or a `DataError::Network`; status interpretation and
//! retries happen above this trait.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DataError, Result};
use crate::executor::Method;

// == Raw Response ==
/// Status and body as received from the wire, before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

// == Http Transport ==
/// Performs a single network attempt. Implementations must map their own
/// connection failures to `DataError::Network`; they never retry.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<RawResponse>;
}

// == Token Provider ==
/// Read-only credential holder consulted per attempt.
pub trait TokenProvider: Send + Sync {
    /// Current bearer token, if the session has one.
    fn bearer_token(&self) -> Option<String>;

    /// Called when the remote rejects the token (401), so the holder can
    /// trigger re-authentication. Default: do nothing.
    fn on_token_expired(&self) {}
}

// == Reqwest Transport ==
/// Production transport over `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<RawResponse> {
        let method = match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(json) = body {
            request = request.json(json);
        }

        let response = request
            .send()
            .await
            .map_err(|err| DataError::Network(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| DataError::Network(err.to_string()))?;

        Ok(RawResponse { status, body })
    }
}
