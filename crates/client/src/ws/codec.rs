//! Frame codec for the notification channel.
//!
//! Decoding is strict but silent: anything that is not a well-formed frame
//! of a known type comes back as [`Rejected`] and is dropped by the caller.

use livesync_shared::{InboundMessage, OutboundCommand, Resource};
use serde_json::Value;

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("empty frame")]
    Empty,
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("frame has no `type`")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("unknown resource `{0}`")]
    UnknownResource(String),
}

impl Rejected {
    /// Log at a level matching how suspicious the frame is.
    pub fn log(&self) {
        match self {
            Rejected::Empty => tracing::debug!("ignoring empty frame"),
            Rejected::UnknownType(_) | Rejected::UnknownResource(_) => {
                tracing::debug!(reason = %self, "ignoring frame")
            }
            Rejected::Malformed(_) | Rejected::MissingType => {
                tracing::warn!(reason = %self, "dropping frame")
            }
        }
    }
}

pub fn decode(raw: &str) -> Result<InboundMessage, Rejected> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Rejected::Empty);
    }

    let value: Value = serde_json::from_str(raw).map_err(|e| Rejected::Malformed(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(Rejected::MissingType)?;
    if !InboundMessage::TYPES.contains(&kind) {
        return Err(Rejected::UnknownType(kind.to_string()));
    }
    if kind == "data_update" {
        if let Some(name) = value.get("dataType").and_then(Value::as_str) {
            if name.parse::<Resource>().is_err() {
                return Err(Rejected::UnknownResource(name.to_string()));
            }
        }
    }

    serde_json::from_value(value).map_err(|e| Rejected::Malformed(e.to_string()))
}

pub fn encode(command: &OutboundCommand) -> Result<String, serde_json::Error> {
    serde_json::to_string(command)
}
