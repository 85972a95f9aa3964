//! Shared query cache.
//!
//! The single source of truth for server-derived state held on the client.
//! Data lives in named regions keyed by a [`CacheKey`]; views read regions and
//! listen on [`QueryCache::subscribe`] to learn when something went stale or
//! was refreshed. The realtime router is the only writer on the channel path.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use livesync_shared::ApiError;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

const EVENT_CAPACITY: usize = 256;

/// Identifier of a cache region, e.g. `posts` or `comments/p1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn region(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Narrow the key with one more segment.
    pub fn with(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// First segment; loaders are registered against it.
    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// A cached region.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Option<Value>,
    pub stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Change notifications for cache subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Everything under `key` is stale and should be reloaded on next read.
    Invalidated { key: CacheKey },
    /// A loader was started for `key`.
    Refetching { key: CacheKey },
    /// `key` holds fresh data.
    Updated { key: CacheKey },
    RefetchFailed { key: CacheKey, reason: String },
}

/// Loads fresh data for a region. Registered per root segment.
#[async_trait]
pub trait RegionLoader: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Value, ApiError>;
}

/// The loader task currently allowed to write a region.
struct InFlight {
    generation: u64,
    task: AbortHandle,
}

pub struct QueryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    loaders: RwLock<HashMap<String, Arc<dyn RegionLoader>>>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    generation: AtomicU64,
    events: broadcast::Sender<CacheEvent>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            loaders: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Register the loader used for eager refetches of every key under `root`.
    pub fn register_loader(&self, root: impl Into<String>, loader: Arc<dyn RegionLoader>) {
        self.loaders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(root.into(), loader);
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entry(key).and_then(|entry| entry.data)
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Missing regions count as stale: they need a load before use.
    pub fn is_stale(&self, key: &CacheKey) -> bool {
        self.entry(key).map(|entry| entry.stale).unwrap_or(true)
    }

    /// Replace a region wholesale with fresh data.
    pub fn set_data(&self, key: CacheKey, value: Value) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                CacheEntry {
                    data: Some(value),
                    stale: false,
                    updated_at: Some(Utc::now()),
                },
            );
        self.emit(CacheEvent::Updated { key });
    }

    /// Mark every region under `prefix` stale. Subscribers are told even when
    /// nothing is cached yet, so a mounted view can still reload.
    pub fn invalidate(&self, prefix: &CacheKey) -> usize {
        let mut touched = 0;
        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            for (key, entry) in entries.iter_mut() {
                if key.starts_with(prefix) {
                    entry.stale = true;
                    touched += 1;
                }
            }
        }
        tracing::debug!(key = %prefix, touched, "cache region invalidated");
        self.emit(CacheEvent::Invalidated {
            key: prefix.clone(),
        });
        touched
    }

    /// Invalidate `key` and reload it right away through its loader.
    ///
    /// Needs a tokio runtime. Without a registered loader the region simply
    /// stays stale. A newer refetch of the same key aborts the older one, so
    /// only the latest load can write the region.
    pub fn refetch(self: &Arc<Self>, key: CacheKey) {
        self.invalidate(&key);

        let loader = self
            .loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key.root())
            .cloned();
        let Some(loader) = loader else {
            tracing::debug!(key = %key, "no loader registered, region left stale");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %key, "refetch requested outside a tokio runtime");
            return;
        };

        self.emit(CacheEvent::Refetching { key: key.clone() });
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cache = Arc::clone(self);
        let task_key = key.clone();

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let task = runtime.spawn(async move {
            let result = loader.load(&task_key).await;
            cache.finish_refetch(task_key, generation, result);
        });
        let current = InFlight {
            generation,
            task: task.abort_handle(),
        };
        if let Some(previous) = in_flight.insert(key, current) {
            previous.task.abort();
        }
    }

    /// Abort every in-flight refetch. Their regions stay stale.
    pub fn cancel_refetches(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, pending) in in_flight.drain() {
            tracing::debug!(key = %key, "refetch cancelled");
            pending.task.abort();
        }
    }

    fn finish_refetch(&self, key: CacheKey, generation: u64, result: Result<Value, ApiError>) {
        // Held across the write so a newer refetch cannot slip in between.
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        match in_flight.get(&key) {
            Some(current) if current.generation == generation => {
                in_flight.remove(&key);
            }
            _ => {
                tracing::debug!(key = %key, "superseded refetch discarded");
                return;
            }
        }
        match result {
            Ok(value) => self.set_data(key, value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "region refetch failed");
                self.emit(CacheEvent::RefetchFailed {
                    key,
                    reason: e.reason(),
                });
            }
        }
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
