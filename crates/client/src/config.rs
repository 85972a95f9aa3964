//! Client configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use livesync_shared::{CHANNEL_PATH, TOKEN_QUERY_PARAM};
use url::Url;

use crate::credentials::Token;
use crate::error::ConfigError;
use crate::ws::ReconnectConfig;

pub const ENV_ORIGIN: &str = "LIVESYNC_ORIGIN";
pub const ENV_WS_URL: &str = "LIVESYNC_WS_URL";
pub const ENV_TOKEN_PATH: &str = "LIVESYNC_TOKEN_PATH";
pub const ENV_SESSION_COOKIE: &str = "LIVESYNC_SESSION_COOKIE";
pub const ENV_HEARTBEAT_SECS: &str = "LIVESYNC_HEARTBEAT_SECS";
pub const ENV_RECONNECT_DELAY_MS: &str = "LIVESYNC_RECONNECT_DELAY_MS";
pub const ENV_RECONNECT_MAX_DELAY_MS: &str = "LIVESYNC_RECONNECT_MAX_DELAY_MS";
pub const ENV_RECONNECT_MULTIPLIER: &str = "LIVESYNC_RECONNECT_MULTIPLIER";
pub const ENV_RECONNECT_JITTER: &str = "LIVESYNC_RECONNECT_JITTER";

const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_TOKEN_PATH: &str = "/api/ws/token";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Origin of the web app; hosts the token endpoint.
    pub origin: Url,
    /// Explicit channel base address. Derived from `origin` when unset.
    pub channel_base: Option<Url>,
    pub token_path: String,
    /// `Cookie` header sent to the token endpoint.
    pub session_cookie: Option<String>,
    /// Ping period while open. Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// Bound on the socket handshake.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl SyncConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            channel_base: None,
            token_path: DEFAULT_TOKEN_PATH.to_string(),
            session_cookie: None,
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LIVESYNC_ORIGIN`: web app origin (default: "http://localhost:3000")
    /// - `LIVESYNC_WS_URL`: channel base address (default: origin with ws/wss scheme)
    /// - `LIVESYNC_TOKEN_PATH`: token endpoint path (default: "/api/ws/token")
    /// - `LIVESYNC_SESSION_COOKIE`: cookie header for the token request
    /// - `LIVESYNC_HEARTBEAT_SECS`: heartbeat period (default: 30)
    /// - `LIVESYNC_RECONNECT_DELAY_MS`: first reconnect delay (default: 3000)
    /// - `LIVESYNC_RECONNECT_MAX_DELAY_MS`: reconnect delay cap (default: 30000)
    /// - `LIVESYNC_RECONNECT_MULTIPLIER`: backoff multiplier (default: 1.5)
    /// - `LIVESYNC_RECONNECT_JITTER`: random spread per delay, 0 to 1 (default: 0.2)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let origin = parse_url(ENV_ORIGIN, &var(ENV_ORIGIN).unwrap_or_else(|| DEFAULT_ORIGIN.to_string()))?;
        let mut config = Self::new(origin);

        if let Some(base) = var(ENV_WS_URL) {
            config.channel_base = Some(parse_url(ENV_WS_URL, &base)?);
        }
        if let Some(path) = var(ENV_TOKEN_PATH) {
            config.token_path = path;
        }
        config.session_cookie = var(ENV_SESSION_COOKIE);

        if let Some(secs) = parse_var::<u64>(ENV_HEARTBEAT_SECS, var(ENV_HEARTBEAT_SECS))? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(ENV_RECONNECT_DELAY_MS, var(ENV_RECONNECT_DELAY_MS))? {
            config.reconnect.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(ENV_RECONNECT_MAX_DELAY_MS, var(ENV_RECONNECT_MAX_DELAY_MS))? {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) =
            parse_var::<f64>(ENV_RECONNECT_MULTIPLIER, var(ENV_RECONNECT_MULTIPLIER))?
        {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(ConfigError::InvalidValue {
                    name: ENV_RECONNECT_MULTIPLIER,
                    value: multiplier.to_string(),
                });
            }
            config.reconnect.backoff_multiplier = multiplier;
        }
        if let Some(jitter) = parse_var::<f64>(ENV_RECONNECT_JITTER, var(ENV_RECONNECT_JITTER))? {
            if !(0.0..=1.0).contains(&jitter) {
                return Err(ConfigError::InvalidValue {
                    name: ENV_RECONNECT_JITTER,
                    value: jitter.to_string(),
                });
            }
            config.reconnect.jitter = jitter;
        }

        Ok(config)
    }

    pub fn token_url(&self) -> Result<Url, ConfigError> {
        self.origin
            .join(&self.token_path)
            .map_err(|source| ConfigError::InvalidUrl {
                name: "token_path",
                source,
            })
    }

    /// Channel URL for one connect attempt, carrying `token` as a query parameter.
    pub fn channel_url(&self, token: &Token) -> Result<Url, ConfigError> {
        let base = self.channel_base.as_ref().unwrap_or(&self.origin);
        let mut url = upgrade_scheme(base)?;
        let path = format!("{}{}", url.path().trim_end_matches('/'), CHANNEL_PATH);
        url.set_path(&path);
        url.set_fragment(None);
        url.query_pairs_mut()
            .append_pair(TOKEN_QUERY_PARAM, token.expose());
        Ok(url)
    }
}

/// http → ws, https → wss; socket schemes pass through.
fn upgrade_scheme(url: &Url) -> Result<Url, ConfigError> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    let mut upgraded = url.clone();
    upgraded
        .set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
    Ok(upgraded)
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { name, source })
}

fn parse_var<T: FromStr>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { name, value: v })
        })
        .transpose()
}
