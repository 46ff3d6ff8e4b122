//! Reconnection bookkeeping for the session event loop.
//!
//! The supervisor owns the reconnect counter and nothing else: it does not
//! schedule sleeps or touch the transport. The event loop reports link
//! losses and successful connects; the supervisor answers with a verdict.
//! Keeping this pure makes the ceiling check testable without a broker.

use super::connection::ReconnectPolicy;
use std::time::Duration;

/// Lifecycle notifications broadcast to session observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection acknowledged by the broker
    Connected,
    /// A connection attempt or the live link failed (informational)
    Error(String),
    /// Automatic reconnect attempt started (attempt count)
    Reconnecting(u32),
    /// Session closed by the caller
    Closed,
    /// Reconnect ceiling exceeded; the session is terminated
    GiveUp,
}

/// Verdict for a single link loss
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorVerdict {
    /// Retry after the policy delay
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached; terminate the session
    GiveUp { attempts: u32 },
}

/// Counts consecutive reconnect attempts and enforces the ceiling
#[derive(Debug, Clone)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        ReconnectSupervisor {
            policy,
            attempts: 0,
        }
    }

    /// Consecutive attempts since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A connection was acknowledged; the streak is over
    pub fn on_connected(&mut self) {
        self.attempts = 0;
    }

    /// The link was lost; decide whether to retry or give up
    pub fn on_link_lost(&mut self) -> SupervisorVerdict {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            SupervisorVerdict::GiveUp {
                attempts: self.attempts,
            }
        } else {
            SupervisorVerdict::Retry {
                attempt: self.attempts,
                delay: self.policy.reconnect_interval,
            }
        }
    }
}
