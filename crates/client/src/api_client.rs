//! Session-backed HTTP client for the web app's API.

use std::time::Duration;

use async_trait::async_trait;
use livesync_shared::ApiError;
use reqwest::header::COOKIE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::stores::{CacheKey, RegionLoader};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client that carries the session cookie on every request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    session_cookie: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: Url) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                Client::new()
            });
        Self {
            client,
            base_url,
            session_cookie: None,
        }
    }

    /// Attach the session cookie header value.
    pub fn with_session_cookie(mut self, cookie: Option<String>) -> Self {
        self.session_cookie = cookie;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Network(format!("invalid request path `{path}`: {e}")))
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let url = self.url(path)?;
        let mut rb = self.client.get(url);
        if let Some(cookie) = &self.session_cookie {
            rb = rb.header(COOKIE, cookie);
        }

        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();

        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

/// Loads a cache region from `GET /api/<segments...>`.
///
/// `public-profile` with no further segments loads `/api/public-profile`;
/// `post/p1` loads `/api/post/p1`.
pub struct ApiRegionLoader {
    api: ApiClient,
}

impl ApiRegionLoader {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn path(key: &CacheKey) -> String {
        let mut path = String::from("/api");
        for segment in key.segments() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }
}

#[async_trait]
impl RegionLoader for ApiRegionLoader {
    async fn load(&self, key: &CacheKey) -> Result<Value, ApiError> {
        self.api.get_json(&Self::path(key)).await
    }
}
