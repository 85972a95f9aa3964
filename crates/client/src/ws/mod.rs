//! Realtime notification channel.
//!
//! This module provides:
//! - Connection management with heartbeat and auto-reconnect
//! - A strict-but-silent frame codec
//! - Routing of domain updates to cache invalidation (components read from
//!   the cache, not from channel events)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────┐
//! │          SyncClient          │◄─────│  TokenProvider   │
//! │ (task owning the socket and  │      └──────────────────┘
//! │  the ConnectionMachine)      │
//! └──────────────────────────────┘
//!          │ text frames               ▲ OutboundCommand
//!          ▼                           │
//!   ┌────────────┐              ┌────────────┐
//!   │   codec    │              │ SyncHandle │
//!   └────────────┘              └────────────┘
//!          │ InboundMessage
//!          ▼
//!   ┌────────────┐  policy   ┌─────────────────────┐
//!   │   Router   │──────────►│     QueryCache      │──► subscribers
//!   └────────────┘           └─────────────────────┘
//!          │
//!          ▼
//!   NotificationPresenter
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let cache = Arc::new(QueryCache::new());
//! let client = SyncClient::spawn(config, credentials, cache.clone(), Arc::new(TracingSink));
//! client.connect();
//!
//! // Elsewhere: fall back to HTTP when the channel is down.
//! if !client.handle().mark_as_read(&id) {
//!     api.post_json("/api/notifications/read", &body).await?;
//! }
//! ```

pub mod codec;
mod connection;
pub mod machine;
pub mod policy;
pub mod router;

pub use connection::{ConnectionPhase, ConnectionStatus, ReconnectConfig, SyncClient, SyncHandle};
pub use machine::Visibility;
