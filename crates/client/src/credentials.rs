//! Short-lived channel tokens.

use std::fmt;

use async_trait::async_trait;
use livesync_shared::ApiError;
use serde::Deserialize;

use crate::api_client::ApiClient;
use crate::config::SyncConfig;
use crate::error::ConfigError;

/// Bearer token for one connect attempt. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Source of channel tokens. Called once per connect attempt; no retries.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<Token, ApiError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Fetches tokens from the session-backed token endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
    api: ApiClient,
    path: String,
}

impl HttpTokenProvider {
    pub fn new(api: ApiClient, path: impl Into<String>) -> Self {
        Self {
            api,
            path: path.into(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        // Validate the joined URL up front so a bad path fails at startup.
        config.token_url()?;
        let api = ApiClient::new(config.origin.clone())
            .with_session_cookie(config.session_cookie.clone());
        Ok(Self::new(api, config.token_path.clone()))
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self) -> Result<Token, ApiError> {
        let resp: TokenResponse = self.api.get_json(&self.path).await?;
        if resp.token.trim().is_empty() {
            return Err(ApiError::Deserialize("token endpoint returned an empty token".into()));
        }
        tracing::debug!("fetched channel token");
        Ok(Token(resp.token))
    }
}
