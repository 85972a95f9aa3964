//! Routes decoded frames to the cache and the notification presenter.

use std::sync::Arc;

use livesync_shared::InboundMessage;
use serde_json::Value;

use super::policy::{self, CacheAction, Refresh, NOTIFICATIONS};
use crate::notify::NotificationPresenter;
use crate::stores::{CacheKey, QueryCache};

pub struct Router {
    cache: Arc<QueryCache>,
    presenter: NotificationPresenter,
}

impl Router {
    pub fn new(cache: Arc<QueryCache>, presenter: NotificationPresenter) -> Self {
        Self { cache, presenter }
    }

    pub fn route(&mut self, message: InboundMessage) {
        tracing::trace!(kind = message.kind(), "routing frame");
        match message {
            InboundMessage::DataUpdate(update) => {
                tracing::debug!(
                    resource = %update.resource,
                    action = ?update.action,
                    "data update"
                );
                for action in policy::plan(update.resource, update.payload.as_ref()) {
                    self.apply(action);
                }
            }
            InboundMessage::NewNotification { data } => {
                self.cache.invalidate(&CacheKey::region(NOTIFICATIONS));
                self.presenter.present(&data.notification);
            }
            InboundMessage::NotificationRead | InboundMessage::AllNotificationsRead => {
                self.cache.invalidate(&CacheKey::region(NOTIFICATIONS));
            }
            InboundMessage::UnreadNotifications { data } => {
                // The push is the whole unread set; no reload needed.
                self.cache
                    .set_data(CacheKey::region(NOTIFICATIONS), Value::Array(data));
            }
            InboundMessage::Ping | InboundMessage::Pong => {
                tracing::trace!("heartbeat frame");
            }
        }
    }

    /// Stop eager refetches this router started; the channel is going away.
    pub fn cancel_refetches(&self) {
        self.cache.cancel_refetches();
    }

    fn apply(&self, action: CacheAction) {
        match action.refresh {
            Refresh::Lazy => {
                self.cache.invalidate(&action.key);
            }
            Refresh::Eager => self.cache.refetch(action.key),
        }
    }
}
