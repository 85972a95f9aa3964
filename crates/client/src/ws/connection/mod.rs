//! Notification channel connection with state management and auto-reconnect.
//!
//! This module provides the shared types; the task that owns the socket lives
//! in `task.rs`.

use std::time::Duration;

use futures_channel::mpsc::UnboundedSender;
use livesync_shared::OutboundCommand;
use rand::Rng;
use tokio::sync::watch;

mod task;

pub use task::SyncClient;

/// Lifecycle phase of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    /// Token fetch or socket handshake in flight
    Connecting,
    Open,
}

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            last_error: None,
        }
    }
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Open)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Connecting)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (1.0 = fixed delay)
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay, as a fraction (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30000),
            backoff_multiplier: 1.5,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    /// Same delay every time, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(32) as i32;
        let delay = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay as u64).min(self.max_delay)
    }

    /// Spread a delay by the configured jitter fraction.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
    }
}

/// Handle for sending commands through the channel and observing its state.
///
/// Sends are fire-and-forget: when the channel is not open they return
/// `false` and nothing is queued, so callers fall back to the HTTP endpoint.
#[derive(Clone)]
pub struct SyncHandle {
    sender: UnboundedSender<OutboundCommand>,
    status: watch::Receiver<ConnectionStatus>,
}

impl SyncHandle {
    pub(crate) fn new(
        sender: UnboundedSender<OutboundCommand>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self { sender, status }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    /// Receiver that wakes on every status change (for "live" indicators).
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Send a command to the server
    pub fn send(&self, cmd: OutboundCommand) -> bool {
        if !self.is_connected() {
            tracing::debug!(?cmd, "channel not open, command not sent");
            return false;
        }
        match self.sender.unbounded_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "connection task gone, command not sent");
                false
            }
        }
    }

    pub fn ping(&self) -> bool {
        self.send(OutboundCommand::Ping)
    }

    pub fn mark_as_read(&self, notification_id: &str) -> bool {
        self.send(OutboundCommand::MarkAsRead {
            notification_id: notification_id.to_string(),
        })
    }

    pub fn mark_all_as_read(&self) -> bool {
        self.send(OutboundCommand::MarkAllAsRead)
    }

    /// Ask the server to push the current unread notifications.
    pub fn request_snapshot(&self) -> bool {
        self.send(OutboundCommand::RequestSnapshot)
    }
}
