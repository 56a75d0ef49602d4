// Remote session endpoints

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::http_client::{ApiClient, HttpMethod};

use super::types::Identity;

/// Server-side session operations the controller depends on
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Current identity; `None` when the server reports nobody logged in
    async fn fetch_identity(&self) -> Result<Option<Identity>>;

    /// Extend the server-side session
    async fn refresh_session(&self) -> Result<()>;

    /// End the server-side session
    async fn logout(&self) -> Result<()>;
}

/// `SessionApi` over the request client and the configured endpoints
pub struct HttpSessionApi {
    client: Arc<ApiClient>,
    identity_endpoint: String,
    refresh_endpoint: String,
    logout_endpoint: String,
}

impl HttpSessionApi {
    pub fn new(client: Arc<ApiClient>, config: &Config) -> Self {
        Self {
            client,
            identity_endpoint: config.identity_endpoint.clone(),
            refresh_endpoint: config.refresh_endpoint.clone(),
            logout_endpoint: config.logout_endpoint.clone(),
        }
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn fetch_identity(&self) -> Result<Option<Identity>> {
        self.client.get(&self.identity_endpoint).await
    }

    async fn refresh_session(&self) -> Result<()> {
        // Only the status matters, the body is ignored
        self.client
            .send(HttpMethod::Post, &self.refresh_endpoint, None)
            .await
            .map(|_| ())
    }

    async fn logout(&self) -> Result<()> {
        self.client
            .send(HttpMethod::Post, &self.logout_endpoint, None)
            .await
            .map(|_| ())
    }
}
