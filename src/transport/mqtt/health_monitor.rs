//! Pure link supervision and reconnection logic for MQTT client
//!
//! [`LinkSupervisor`] owns the connection state machine. The I/O loop feeds
//! it [`ConnectionEvent`]s and acts on the returned [`LinkDecision`]; nothing
//! in here sleeps or touches the network, so every transition is unit
//! testable.

use super::connection::{ConnectionState, ReconnectPolicy};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Events observed on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake started by an explicit connect
    ConnectRequested,
    /// Broker accepted the session
    ConnAckReceived,
    /// Network error, refused handshake or broker-initiated disconnect
    LinkLost(String),
    /// Explicit shutdown started
    ShutdownRequested,
    /// Explicit shutdown finished
    ShutdownComplete,
}

/// What the I/O loop should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecision {
    /// Nothing to do
    Ignore,
    /// Handshake in progress
    Connecting,
    /// Session up; `resumed` is true after a reconnection
    Established { resumed: bool },
    /// The initial connect failed; report to the caller, do not retry
    ConnectFailed { reason: String },
    /// Sleep `delay`, then try again
    Retry { attempt: u32, delay: Duration },
    /// Reconnection exhausted; surface the fatal error once and stop
    GiveUp { attempts: u32, reason: String },
    /// Explicit shutdown; stop without reporting an error
    Stop,
}

/// Connection state machine with bounded reconnection
#[derive(Debug)]
pub struct LinkSupervisor {
    policy: Option<ReconnectPolicy>,
    state: ConnectionState,
    attempts: u32,
    reconnect_count: u32,
    connected_since: Option<Instant>,
}

impl LinkSupervisor {
    pub fn new(policy: Option<ReconnectPolicy>) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            reconnect_count: 0,
            connected_since: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Apply one event and return the resulting decision
    pub fn on_event(&mut self, event: ConnectionEvent) -> LinkDecision {
        let previous = self.state;
        let decision = self.transition(event);
        if previous != self.state {
            log_state_transition(&previous, &self.state);
        }
        decision
    }

    fn transition(&mut self, event: ConnectionEvent) -> LinkDecision {
        match (self.state, event) {
            (ConnectionState::Disconnected, ConnectionEvent::ConnectRequested) => {
                self.state = ConnectionState::Connecting;
                self.attempts = 0;
                LinkDecision::Connecting
            }
            (
                ConnectionState::Connecting | ConnectionState::Reconnecting { .. },
                ConnectionEvent::ConnAckReceived,
            ) => {
                let resumed = matches!(self.state, ConnectionState::Reconnecting { .. });
                if resumed {
                    self.reconnect_count += 1;
                }
                self.state = ConnectionState::Connected;
                self.attempts = 0;
                self.connected_since = Some(Instant::now());
                LinkDecision::Established { resumed }
            }
            (ConnectionState::Connecting, ConnectionEvent::LinkLost(reason)) => {
                self.state = ConnectionState::Disconnected;
                LinkDecision::ConnectFailed { reason }
            }
            (
                ConnectionState::Connected | ConnectionState::Reconnecting { .. },
                ConnectionEvent::LinkLost(reason),
            ) => self.on_link_lost(reason),
            (
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting { .. },
                ConnectionEvent::ShutdownRequested,
            ) => {
                self.state = ConnectionState::Disconnecting;
                self.connected_since = None;
                LinkDecision::Stop
            }
            (_, ConnectionEvent::ShutdownComplete) => {
                self.state = ConnectionState::Disconnected;
                self.connected_since = None;
                LinkDecision::Stop
            }
            _ => LinkDecision::Ignore,
        }
    }

    fn on_link_lost(&mut self, reason: String) -> LinkDecision {
        self.connected_since = None;

        let Some(policy) = &self.policy else {
            self.state = ConnectionState::Disconnected;
            return LinkDecision::GiveUp {
                attempts: 0,
                reason,
            };
        };

        if self.attempts >= policy.max_attempts {
            let attempts = self.attempts;
            self.state = ConnectionState::Disconnected;
            self.attempts = 0;
            return LinkDecision::GiveUp { attempts, reason };
        }

        self.attempts += 1;
        let delay = policy.backoff_delay(self.attempts);
        self.state = ConnectionState::Reconnecting {
            attempt: self.attempts,
        };
        warn!(
            attempt = self.attempts,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "MQTT link lost, scheduling reconnection"
        );
        LinkDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Snapshot of link health
    pub fn health(&self) -> LinkHealth {
        LinkHealth {
            state: self.state,
            uptime: self.connected_since.map(|since| since.elapsed()),
            reconnect_count: self.reconnect_count,
        }
    }
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct LinkHealth {
    pub state: ConnectionState,
    /// Time since the current session was established
    pub uptime: Option<Duration>,
    /// Successful reconnections since creation
    pub reconnect_count: u32,
}

/// Log connection state transition (pure logging function)
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("MQTT connection established successfully");
        }
        (ConnectionState::Reconnecting { attempt }, ConnectionState::Connected) => {
            info!(attempt = *attempt, "Reconnection successful");
        }
        (ConnectionState::Connected, ConnectionState::Reconnecting { .. }) => {
            warn!("MQTT connection lost, reconnecting");
        }
        (ConnectionState::Connected | ConnectionState::Reconnecting { .. }, ConnectionState::Disconnected) => {
            error!("MQTT connection permanently lost");
        }
        _ => {
            info!("MQTT connection state: {:?} -> {:?}", from, to);
        }
    }
}
