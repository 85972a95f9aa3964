//! Notification channel wire protocol.
//!
//! Every frame is a JSON text frame carrying a `type` tag. Inbound frames are
//! produced by the server's fan-out; outbound frames are the handful of
//! commands a client may issue over the same socket.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Path of the notification channel, relative to the channel base address.
pub const CHANNEL_PATH: &str = "/ws/notifications";

/// Query parameter carrying the bearer token on the channel URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Close code reserved for client-initiated, intentional disconnects.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the socket ends without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Whether a close code means the peer wanted the channel gone for good.
pub fn is_intentional_close(code: u16) -> bool {
    code == CLOSE_NORMAL
}

/// Backend resources that announce changes through `data_update` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum Resource {
    Videos,
    Products,
    Coupons,
    Banners,
    Categories,
    Popups,
    Notifications,
    Users,
    UserStats,
    UserActivity,
    UserReferrals,
    Posts,
    Gamification,
}

impl Resource {
    pub const ALL: [Resource; 13] = [
        Resource::Videos,
        Resource::Products,
        Resource::Coupons,
        Resource::Banners,
        Resource::Categories,
        Resource::Popups,
        Resource::Notifications,
        Resource::Users,
        Resource::UserStats,
        Resource::UserActivity,
        Resource::UserReferrals,
        Resource::Posts,
        Resource::Gamification,
    ];

    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Videos => "videos",
            Resource::Products => "products",
            Resource::Coupons => "coupons",
            Resource::Banners => "banners",
            Resource::Categories => "categories",
            Resource::Popups => "popups",
            Resource::Notifications => "notifications",
            Resource::Users => "users",
            Resource::UserStats => "user_stats",
            Resource::UserActivity => "user_activity",
            Resource::UserReferrals => "user_referrals",
            Resource::Posts => "posts",
            Resource::Gamification => "gamification",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a `dataType` names a resource this client does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource `{0}`")]
pub struct UnknownResource(pub String);

impl FromStr for Resource {
    type Err = UnknownResource;

    /// Accepts the canonical plural names and the singular spellings some
    /// backend emitters still use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let resource = match s {
            "videos" | "video" => Resource::Videos,
            "products" | "product" => Resource::Products,
            "coupons" | "coupon" => Resource::Coupons,
            "banners" | "banner" => Resource::Banners,
            "categories" | "category" => Resource::Categories,
            "popups" | "popup" => Resource::Popups,
            "notifications" | "notification" => Resource::Notifications,
            "users" | "user" => Resource::Users,
            "user_stats" => Resource::UserStats,
            "user_activity" | "user_activities" => Resource::UserActivity,
            "user_referrals" | "user_referral" => Resource::UserReferrals,
            "posts" | "post" => Resource::Posts,
            "gamification" => Resource::Gamification,
            other => return Err(UnknownResource(other.to_string())),
        };
        Ok(resource)
    }
}

impl TryFrom<String> for Resource {
    type Error = UnknownResource;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Updated,
    Deleted,
}

/// Resource-specific identifiers attached to a `data_update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Map<String, Value>);

impl Payload {
    /// Read an identifier field, accepting either a JSON string or number.
    /// Empty strings count as absent.
    pub fn id(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Payload(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Body of a `data_update` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataUpdate {
    #[serde(rename = "dataType")]
    pub resource: Resource,
    pub action: Action,
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    /// Emitter's clock; informational only, so any JSON shape is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// A notification as pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub notification: Notification,
}

/// Frames the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Ping,
    Pong,
    NewNotification { data: NewNotification },
    NotificationRead,
    AllNotificationsRead,
    UnreadNotifications {
        #[serde(default)]
        data: Vec<Value>,
    },
    DataUpdate(DataUpdate),
}

impl InboundMessage {
    /// Every `type` tag this client understands.
    pub const TYPES: [&'static str; 7] = [
        "ping",
        "pong",
        "new_notification",
        "notification_read",
        "all_notifications_read",
        "unread_notifications",
        "data_update",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Ping => "ping",
            InboundMessage::Pong => "pong",
            InboundMessage::NewNotification { .. } => "new_notification",
            InboundMessage::NotificationRead => "notification_read",
            InboundMessage::AllNotificationsRead => "all_notifications_read",
            InboundMessage::UnreadNotifications { .. } => "unread_notifications",
            InboundMessage::DataUpdate(_) => "data_update",
        }
    }
}

/// Commands the client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    Ping,
    MarkAsRead {
        #[serde(rename = "notificationId")]
        notification_id: String,
    },
    MarkAllAsRead,
    /// Ask the server to push the current unread set.
    #[serde(rename = "request_notifications")]
    RequestSnapshot,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
