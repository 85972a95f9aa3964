//! User-facing notifications raised from realtime events.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use livesync_shared::Notification;

/// How many displayed notification ids are remembered for de-duplication.
const SHOWN_WINDOW: usize = 256;

/// Host permission to display notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Not asked yet.
    Default,
    Granted,
    Denied,
}

/// A notification ready for display. `tag` is the de-duplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayNotification {
    pub tag: String,
    pub title: String,
    pub body: Option<String>,
    pub icon: Option<String>,
}

impl From<&Notification> for DisplayNotification {
    fn from(notification: &Notification) -> Self {
        Self {
            tag: notification.id.clone(),
            title: notification.title.clone(),
            body: notification.description.clone(),
            icon: notification.image_url.clone(),
        }
    }
}

/// The host's notification facility (desktop notifier, browser API, ...).
pub trait NotificationSink: Send + Sync {
    fn permission(&self) -> Permission;
    /// Prompt the user. Returns the resulting permission.
    fn request_permission(&self) -> Permission;
    fn show(&self, notification: &DisplayNotification);
}

/// Sink that writes notifications to the log. Always permitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, notification: &DisplayNotification) {
        tracing::info!(
            tag = %notification.tag,
            title = %notification.title,
            body = notification.body.as_deref().unwrap_or(""),
            "notification"
        );
    }
}

/// Displays notifications at most once per id, asking for permission at most
/// once per session.
pub struct NotificationPresenter {
    sink: Arc<dyn NotificationSink>,
    permission_requested: bool,
    shown: HashSet<String>,
    order: VecDeque<String>,
}

impl NotificationPresenter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            permission_requested: false,
            shown: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns true if the notification was handed to the sink.
    pub fn present(&mut self, notification: &Notification) -> bool {
        if self.shown.contains(&notification.id) {
            tracing::debug!(id = %notification.id, "notification already shown");
            return false;
        }

        let permission = match self.sink.permission() {
            Permission::Default if !self.permission_requested => {
                self.permission_requested = true;
                self.sink.request_permission()
            }
            permission => permission,
        };
        if permission != Permission::Granted {
            tracing::debug!(id = %notification.id, ?permission, "notification display not permitted");
            return false;
        }

        self.remember(notification.id.clone());
        self.sink.show(&DisplayNotification::from(notification));
        true
    }

    fn remember(&mut self, id: String) {
        if self.order.len() == SHOWN_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.shown.remove(&oldest);
            }
        }
        self.shown.insert(id.clone());
        self.order.push_back(id);
    }
}
