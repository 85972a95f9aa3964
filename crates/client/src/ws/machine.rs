//! Connection lifecycle state machine.
//!
//! Pure: it owns no socket and no timer. The connection task feeds it
//! [`Input`]s and carries out the [`Effect`]s it returns, so every transition
//! can be exercised without a network.

use std::time::Duration;

use livesync_shared::{is_intentional_close, CLOSE_NORMAL};

use super::connection::{ConnectionPhase, ConnectionStatus, ReconnectConfig};

/// Whether the host is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Connect,
    Disconnect,
    /// Token endpoint unreachable or refused.
    CredentialFailed(String),
    /// Socket handshake failed.
    OpenFailed(String),
    Opened,
    SocketError(String),
    Closed { code: u16 },
    HeartbeatTick,
    ReconnectDue,
    VisibilityChanged(Visibility),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fetch a token, then open the socket.
    BeginConnect,
    /// Drop the in-flight connect attempt.
    AbortConnect,
    StartHeartbeat,
    StopHeartbeat,
    /// Arm the single reconnect timer. Always preceded by `CancelReconnect`
    /// when a timer was already pending.
    ScheduleReconnect(Duration),
    CancelReconnect,
    SendPing,
    CloseSocket { code: u16 },
    Publish(ConnectionStatus),
}

#[derive(Debug)]
pub struct ConnectionMachine {
    phase: ConnectionPhase,
    last_error: Option<String>,
    /// Cleared by an explicit disconnect; nothing reconnects until the next `Connect`.
    wanted: bool,
    visibility: Visibility,
    heartbeat_running: bool,
    reconnect_pending: bool,
    attempt: u32,
    reconnect: ReconnectConfig,
}

impl ConnectionMachine {
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            last_error: None,
            wanted: false,
            visibility: Visibility::Visible,
            heartbeat_running: false,
            reconnect_pending: false,
            attempt: 0,
            reconnect,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            phase: self.phase,
            last_error: self.last_error.clone(),
        }
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        let before = self.status();
        let mut effects = Vec::new();

        match input {
            Input::Connect => {
                self.wanted = true;
                if self.phase == ConnectionPhase::Idle {
                    self.begin_connect(&mut effects);
                }
            }
            Input::Disconnect => {
                self.wanted = false;
                match self.phase {
                    ConnectionPhase::Connecting => effects.push(Effect::AbortConnect),
                    ConnectionPhase::Open => effects.push(Effect::CloseSocket { code: CLOSE_NORMAL }),
                    ConnectionPhase::Idle => {}
                }
                self.stop_heartbeat(&mut effects);
                self.cancel_reconnect(&mut effects);
                self.phase = ConnectionPhase::Idle;
                self.attempt = 0;
            }
            Input::CredentialFailed(reason) | Input::OpenFailed(reason)
                if self.phase == ConnectionPhase::Connecting =>
            {
                self.phase = ConnectionPhase::Idle;
                self.last_error = Some(reason);
                self.reschedule_reconnect(&mut effects);
            }
            Input::Opened if self.phase == ConnectionPhase::Connecting => {
                self.phase = ConnectionPhase::Open;
                self.last_error = None;
                self.attempt = 0;
                self.heartbeat_running = true;
                effects.push(Effect::StartHeartbeat);
            }
            Input::SocketError(reason) if self.phase == ConnectionPhase::Open => {
                // The close that follows decides what happens next.
                self.last_error = Some(reason);
            }
            Input::Closed { code } if self.phase == ConnectionPhase::Open => {
                self.phase = ConnectionPhase::Idle;
                self.stop_heartbeat(&mut effects);
                if !is_intentional_close(code) {
                    self.reschedule_reconnect(&mut effects);
                }
            }
            Input::HeartbeatTick if self.phase == ConnectionPhase::Open => {
                effects.push(Effect::SendPing);
            }
            Input::ReconnectDue => {
                self.reconnect_pending = false;
                if self.wanted && self.phase == ConnectionPhase::Idle {
                    self.begin_connect(&mut effects);
                }
            }
            Input::VisibilityChanged(visibility) => {
                let was_hidden = self.visibility == Visibility::Hidden;
                self.visibility = visibility;
                if was_hidden
                    && visibility == Visibility::Visible
                    && self.wanted
                    && self.phase == ConnectionPhase::Idle
                {
                    tracing::debug!("foregrounded while disconnected, reconnecting now");
                    self.begin_connect(&mut effects);
                }
            }
            stale => {
                tracing::trace!(input = ?stale, phase = ?self.phase, "ignoring input");
            }
        }

        let after = self.status();
        if after != before {
            effects.push(Effect::Publish(after));
        }
        effects
    }

    fn begin_connect(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_reconnect(effects);
        self.phase = ConnectionPhase::Connecting;
        effects.push(Effect::BeginConnect);
    }

    fn reschedule_reconnect(&mut self, effects: &mut Vec<Effect>) {
        self.cancel_reconnect(effects);
        let delay = self.reconnect.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.reconnect_pending = true;
        effects.push(Effect::ScheduleReconnect(delay));
    }

    fn cancel_reconnect(&mut self, effects: &mut Vec<Effect>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
    }

    fn stop_heartbeat(&mut self, effects: &mut Vec<Effect>) {
        if self.heartbeat_running {
            self.heartbeat_running = false;
            effects.push(Effect::StopHeartbeat);
        }
    }
}
