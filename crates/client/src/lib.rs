//! Livesync client - realtime sync engine
//!
//! Keeps a client-side query cache consistent with the backend by listening
//! on a token-authenticated notification channel and invalidating (or eagerly
//! refetching) the cache regions each domain update touches.

pub mod api_client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod notify;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, ApiRegionLoader};
pub use config::SyncConfig;
pub use credentials::{HttpTokenProvider, Token, TokenProvider};
pub use error::{ApiError, ConfigError};
pub use notify::{NotificationPresenter, NotificationSink, Permission, TracingSink};
pub use stores::{CacheEvent, CacheKey, QueryCache};
pub use ws::{ConnectionPhase, ConnectionStatus, ReconnectConfig, SyncClient, SyncHandle, Visibility};
