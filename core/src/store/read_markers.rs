/// Per-conversation read watermarks and the local "read override"
use crate::messenger_types::{Message, SendState};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Delivery indicator for an outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ticks {
    /// Request still in flight
    Sending,
    /// Accepted by the server (single tick)
    Sent,
    /// Covered by the customer's read receipt (double tick)
    Seen,
}

/// Two independent watermarks: our own last read, and the customer's receipt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadMarker {
    pub read_at: Option<DateTime<Utc>>,
    pub customer_read_at: Option<DateTime<Utc>>,
}

impl ReadMarker {
    /// Advance `read_at`; an older or empty value never regresses a newer one.
    pub fn observe_read_at(&mut self, value: Option<DateTime<Utc>>) -> bool {
        advance(&mut self.read_at, value)
    }

    pub fn observe_customer_read_at(&mut self, value: Option<DateTime<Utc>>) -> bool {
        advance(&mut self.customer_read_at, value)
    }

    /// Explicit "mark unread" replaces the watermark, regression included
    pub fn reset_read_at(&mut self, value: Option<DateTime<Utc>>) {
        self.read_at = value;
    }

    /// Inbound customer message newer than our own watermark
    pub fn is_unseen(&self, msg: &Message) -> bool {
        if !msg.is_customer() {
            return false;
        }
        match self.read_at {
            Some(read_at) => msg.timestamp > read_at,
            None => true,
        }
    }

    /// Tick state for an outbound message; `None` for customer messages
    pub fn ticks(&self, msg: &Message) -> Option<Ticks> {
        if msg.is_customer() {
            return None;
        }
        if let Some(local) = &msg.local {
            if local.state == SendState::Sending {
                return Some(Ticks::Sending);
            }
        }
        match self.customer_read_at {
            Some(seen) if msg.timestamp <= seen => Some(Ticks::Seen),
            _ => Some(Ticks::Sent),
        }
    }
}

fn advance(slot: &mut Option<DateTime<Utc>>, value: Option<DateTime<Utc>>) -> bool {
    match (*slot, value) {
        (_, None) => false,
        (Some(current), Some(next)) if next <= current => false,
        (_, Some(next)) => {
            *slot = Some(next);
            true
        }
    }
}

/// Conversations the user opened whose unread dot must stay hidden even if a
/// lagging summary poll still reports unread messages.
///
/// An override ends when a new customer message arrives for a conversation
/// that is not open, on an explicit mark-unread, or after `max_polls` summary
/// polls (the open conversation never ages).
#[derive(Debug, Clone)]
pub struct ReadOverrides {
    held: HashMap<String, u32>,
    max_polls: u32,
}

impl ReadOverrides {
    pub fn new(max_polls: u32) -> Self {
        Self {
            held: HashMap::new(),
            max_polls,
        }
    }

    pub fn hold(&mut self, conversation_id: &str) {
        self.held.insert(conversation_id.to_string(), 0);
    }

    pub fn release(&mut self, conversation_id: &str) -> bool {
        self.held.remove(conversation_id).is_some()
    }

    pub fn is_held(&self, conversation_id: &str) -> bool {
        self.held.contains_key(conversation_id)
    }

    /// Age every override by one summary poll; returns the ids that expired
    pub fn on_poll(&mut self, active: Option<&str>) -> Vec<String> {
        let mut expired = Vec::new();
        for (id, polls) in self.held.iter_mut() {
            if Some(id.as_str()) == active {
                *polls = 0;
                continue;
            }
            *polls += 1;
            if *polls > self.max_polls {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            self.held.remove(id);
        }
        expired
    }

    pub fn clear(&mut self) {
        self.held.clear();
    }
}
