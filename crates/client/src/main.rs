//! livesync-tail - connect to the notification channel and log every cache event.

use std::sync::Arc;

use anyhow::Context;
use livesync_client::ws::policy::{COMMUNITY_SETTINGS, PUBLIC_PROFILE};
use livesync_client::{
    ApiClient, ApiRegionLoader, CacheEvent, ConnectionPhase, ConnectionStatus, HttpTokenProvider,
    QueryCache, SyncClient, SyncConfig, TracingSink,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("livesync_client=debug,livesync_tail=debug")),
        )
        .init();

    let config = SyncConfig::from_env().context("invalid LIVESYNC_* configuration")?;
    let credentials =
        HttpTokenProvider::from_config(&config).context("invalid token endpoint")?;

    let cache = Arc::new(QueryCache::new());
    let api = ApiClient::new(config.origin.clone())
        .with_session_cookie(config.session_cookie.clone());
    let loader = Arc::new(ApiRegionLoader::new(api));
    for region in [COMMUNITY_SETTINGS, PUBLIC_PROFILE] {
        cache.register_loader(region, loader.clone());
    }

    tracing::info!(origin = %config.origin, "starting livesync-tail");
    let client = SyncClient::spawn(config, Arc::new(credentials), cache.clone(), Arc::new(TracingSink));
    let handle = client.handle();
    let mut status = handle.watch_status();
    let mut previous = status.borrow().phase;
    let mut events = cache.subscribe();
    client.connect();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!(phase = ?current.phase, last_error = ?current.last_error, "status");
                if just_opened(previous, &current) && !handle.request_snapshot() {
                    tracing::warn!("snapshot request dropped");
                }
                previous = current.phase;
            }
            event = events.recv() => match event {
                Ok(CacheEvent::Invalidated { key }) => tracing::info!(%key, "invalidated"),
                Ok(CacheEvent::Refetching { key }) => tracing::info!(%key, "refetching"),
                Ok(CacheEvent::Updated { key }) => {
                    let data = cache.get(&key).unwrap_or_default();
                    tracing::info!(%key, %data, "updated");
                }
                Ok(CacheEvent::RefetchFailed { key, reason }) => {
                    tracing::warn!(%key, %reason, "refetch failed");
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "cache events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    Ok(())
}

/// One snapshot per open; error-only status changes must not ask again.
fn just_opened(previous: ConnectionPhase, current: &ConnectionStatus) -> bool {
    previous != ConnectionPhase::Open && current.is_connected()
}
