//! Acknowledgement decisions for dispatched messages

use crate::protocol::{InboundMessage, QoS};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

/// Messages with failure history kept by the tracker
const TRACKED_MESSAGES: usize = 1024;

/// What to do with a message whose handler failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckPolicy {
    /// Acknowledge anyway; the message is lost
    #[default]
    AcknowledgeAndDrop,
    /// Withhold the acknowledgement so the broker redelivers, up to a limit
    Redeliver { max_redeliveries: u32 },
}

/// Outcome of one dispatch as far as acknowledgement is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Handler failed, panicked or timed out
    HandlerFailed,
    /// No subscription matched, or the payload did not decode
    Undeliverable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// QoS 0: nothing to acknowledge
    NotRequired,
    Acknowledge,
    /// Leave unacknowledged for redelivery
    Withhold { failures: u32 },
    /// Redelivery budget exhausted: acknowledge and drop
    AcknowledgeAndDrop { failures: u32 },
}

impl AckPolicy {
    /// Decide for a message that has now failed `failures` times in total
    pub fn decide(self, qos: QoS, outcome: DispatchOutcome, failures: u32) -> AckDecision {
        if !qos.requires_ack() {
            return AckDecision::NotRequired;
        }

        match (outcome, self) {
            (DispatchOutcome::Handled | DispatchOutcome::Undeliverable, _) => {
                AckDecision::Acknowledge
            }
            (DispatchOutcome::HandlerFailed, AckPolicy::AcknowledgeAndDrop) => {
                AckDecision::Acknowledge
            }
            (DispatchOutcome::HandlerFailed, AckPolicy::Redeliver { max_redeliveries }) => {
                if failures >= max_redeliveries {
                    AckDecision::AcknowledgeAndDrop { failures }
                } else {
                    AckDecision::Withhold { failures }
                }
            }
        }
    }
}

/// Bounded failure counts per message identity
///
/// A redelivered message carries a new packet id, so identity is a hash of
/// topic and payload.
#[derive(Debug)]
pub struct RedeliveryTracker {
    capacity: usize,
    failures: HashMap<u64, u32>,
    order: VecDeque<u64>,
}

impl Default for RedeliveryTracker {
    fn default() -> Self {
        Self::with_capacity(TRACKED_MESSAGES)
    }
}

impl RedeliveryTracker {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            failures: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn key(message: &InboundMessage) -> u64 {
        let mut hasher = DefaultHasher::new();
        message.topic.hash(&mut hasher);
        message.payload.hash(&mut hasher);
        hasher.finish()
    }

    /// Count one more failure and return the total
    pub fn record_failure(&mut self, message: &InboundMessage) -> u32 {
        let key = Self::key(message);
        if let Some(count) = self.failures.get_mut(&key) {
            *count += 1;
            return *count;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.failures.remove(&oldest);
            }
        }
        self.order.push_back(key);
        self.failures.insert(key, 1);
        1
    }

    /// Forget a message once it has been acknowledged
    pub fn forget(&mut self, message: &InboundMessage) {
        let key = Self::key(message);
        if self.failures.remove(&key).is_some() {
            self.order.retain(|tracked| *tracked != key);
        }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}
