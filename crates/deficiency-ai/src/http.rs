//! HTTP client for a generation endpoint.
//!
//! `POST {base_url}/generate` with a [`ModelRequest`] body; the server
//! replies with a [`ModelResponse`]. An optional bearer token is sent when
//! configured.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::model::{ClassificationModel, ModelError, ModelRequest, ModelResponse};

fn transport_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout
    } else if err.is_decode() {
        ModelError::Json(err.to_string())
    } else {
        ModelError::Transport(err.to_string())
    }
}

pub struct HttpModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModel {
    /// `base_url` like `http://localhost:9000` (a trailing slash is trimmed).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl ClassificationModel for HttpModel {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/generate", self.base_url);
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let response: ModelResponse = resp.json().await.map_err(transport_error)?;
        debug!(url = %url, tokens = response.tokens_used, "generation complete");
        Ok(response)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}
