use anyhow::Context;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;

use crate::config::Config;
use crate::error::{RequestError, Result};

/// HTTP verbs accepted by the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

/// Append an endpoint to a base URL with exactly one `/` between them
pub fn join_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if endpoint.starts_with('/') {
        format!("{}{}", base, endpoint)
    } else {
        format!("{}/{}", base, endpoint)
    }
}

/// Request client for the remote API
///
/// Every request carries the cookie jar, so a session cookie set by the
/// server travels on all later calls. Failures come back classified as
/// `RequestError`; nothing is retried or recovered here.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling and a cookie store
    client: Client,

    /// Base URL endpoints are appended to
    base_url: String,
}

impl ApiClient {
    /// Create a new client from configuration
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .connect_timeout(config.http_connect_timeout)
            .timeout(config.http_request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Base URL endpoints are appended to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an endpoint
    pub fn url_for(&self, endpoint: &str) -> String {
        join_url(&self.base_url, endpoint)
    }

    /// Send a request and classify the outcome.
    ///
    /// A 2xx response is returned untouched. A JSON body, when given, is sent
    /// with `Content-Type: application/json`; without a body no content type
    /// header is set.
    pub async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Response> {
        let url = self.url_for(endpoint);

        tracing::debug!(
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        let mut builder = self.client.request(method.as_reqwest(), &url);
        if let Some(body) = body {
            // `json` sets Content-Type: application/json
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let error_kind = classify_transport_error(&e);
                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    method = %method,
                    url = %url,
                    "HTTP request error"
                );
                return Err(RequestError::transport(error_kind, e));
            }
        };

        let status = response.status();
        tracing::debug!(
            status = %status,
            "Received HTTP response"
        );

        if status.is_success() {
            return Ok(response);
        }

        // Missing authentication is an expected outcome, keep it quiet and never log the body
        if status == StatusCode::UNAUTHORIZED {
            tracing::debug!(
                method = %method,
                url = %url,
                "Request not authenticated"
            );
            return Err(RequestError::AuthRequired);
        }

        let error_text = response.text().await.unwrap_or_default();
        let error = RequestError::from_response(status.as_u16(), error_text);

        tracing::warn!(
            status = status.as_u16(),
            method = %method,
            url = %url,
            error = %error,
            "HTTP request failed with error response"
        );

        Err(error)
    }

    /// GET an endpoint and decode the JSON body
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self.send(HttpMethod::Get, endpoint, None).await?;
        decode_json(response).await
    }

    /// POST to an endpoint and decode the JSON body
    pub async fn post<T: DeserializeOwned>(&self, endpoint: &str, body: Option<&Value>) -> Result<T> {
        let response = self.send(HttpMethod::Post, endpoint, body).await?;
        decode_json(response).await
    }

    /// PATCH an endpoint and decode the JSON body
    pub async fn patch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let response = self.send(HttpMethod::Patch, endpoint, body).await?;
        decode_json(response).await
    }

    /// DELETE an endpoint; `None` when the server answers 204 No Content
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Option<T>> {
        let response = self.send(HttpMethod::Delete, endpoint, None).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode_json(response).await.map(Some)
    }
}

/// Decode a successful response body as JSON
async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status().as_u16();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| RequestError::transport(classify_transport_error(&e), e))?;

    serde_json::from_slice(&bytes).map_err(|e| RequestError::InvalidBody {
        status,
        message: e.to_string(),
    })
}

/// Categorize a transport error for logs and failure bodies
fn classify_transport_error(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}
