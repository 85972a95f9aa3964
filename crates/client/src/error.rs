//! Client-side error types.

pub use livesync_shared::ApiError;

/// Invalid client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL for {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme `{0}` for the notification channel")]
    UnsupportedScheme(String),
    #[error("invalid value `{value}` for {name}")]
    InvalidValue { name: &'static str, value: String },
}
