//! Events a subscription records about itself.

use crate::envelope::Envelope;
use crate::error::Result;
use crate::listener::ListenerState;
use crate::types::{ProducerId, Timestamp, Version};
use serde::{Deserialize, Serialize};

pub const SUBSCRIPTION_STARTED: &str = "subscription.started";
pub const SUBSCRIPTION_RESTARTED: &str = "subscription.restarted";
pub const SUBSCRIPTION_PAUSED: &str = "subscription.paused";
pub const SUBSCRIPTION_UNPAUSED: &str = "subscription.unpaused";
pub const SUBSCRIPTION_LISTENED_TO_EVENT: &str = "subscription.listened_to_event";
pub const SUBSCRIPTION_IGNORED_EVENT: &str = "subscription.ignored_event";
pub const SUBSCRIPTION_LISTENERS_STATE_CHANGED: &str = "subscription.listeners_state_changed";
pub const SUBSCRIPTION_COMPLETED: &str = "subscription.completed";

/// Every bookkeeping event type. Subscriptions never stream these to their
/// listeners.
pub const SUBSCRIPTION_EVENT_TYPES: [&str; 8] = [
    SUBSCRIPTION_STARTED,
    SUBSCRIPTION_RESTARTED,
    SUBSCRIPTION_PAUSED,
    SUBSCRIPTION_UNPAUSED,
    SUBSCRIPTION_LISTENED_TO_EVENT,
    SUBSCRIPTION_IGNORED_EVENT,
    SUBSCRIPTION_LISTENERS_STATE_CHANGED,
    SUBSCRIPTION_COMPLETED,
];

/// A lifecycle transition of a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubscriptionEvent {
    #[serde(rename = "subscription.started")]
    Started { by: Envelope, at: Timestamp },

    #[serde(rename = "subscription.restarted")]
    Restarted { at: Timestamp },

    #[serde(rename = "subscription.paused")]
    Paused { at: Timestamp },

    #[serde(rename = "subscription.unpaused")]
    Unpaused { at: Timestamp },

    #[serde(rename = "subscription.listened_to_event")]
    ListenedToEvent { event: Envelope, at: Timestamp },

    #[serde(rename = "subscription.ignored_event")]
    IgnoredEvent { event: Envelope, at: Timestamp },

    #[serde(rename = "subscription.listeners_state_changed")]
    ListenersStateChanged { state: ListenerState, at: Timestamp },

    #[serde(rename = "subscription.completed")]
    Completed { by: Envelope, at: Timestamp },
}

impl SubscriptionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SubscriptionEvent::Started { .. } => SUBSCRIPTION_STARTED,
            SubscriptionEvent::Restarted { .. } => SUBSCRIPTION_RESTARTED,
            SubscriptionEvent::Paused { .. } => SUBSCRIPTION_PAUSED,
            SubscriptionEvent::Unpaused { .. } => SUBSCRIPTION_UNPAUSED,
            SubscriptionEvent::ListenedToEvent { .. } => SUBSCRIPTION_LISTENED_TO_EVENT,
            SubscriptionEvent::IgnoredEvent { .. } => SUBSCRIPTION_IGNORED_EVENT,
            SubscriptionEvent::ListenersStateChanged { .. } => SUBSCRIPTION_LISTENERS_STATE_CHANGED,
            SubscriptionEvent::Completed { .. } => SUBSCRIPTION_COMPLETED,
        }
    }

    pub fn at(&self) -> Timestamp {
        match self {
            SubscriptionEvent::Started { at, .. }
            | SubscriptionEvent::Restarted { at }
            | SubscriptionEvent::Paused { at }
            | SubscriptionEvent::Unpaused { at }
            | SubscriptionEvent::ListenedToEvent { at, .. }
            | SubscriptionEvent::IgnoredEvent { at, .. }
            | SubscriptionEvent::ListenersStateChanged { at, .. }
            | SubscriptionEvent::Completed { at, .. } => *at,
        }
    }

    /// Wrap this transition in an envelope of the subscription `producer`.
    pub fn to_envelope(&self, producer: ProducerId, version: Version) -> Result<Envelope> {
        Envelope::json(self.event_type(), producer, version, self.at(), self)
    }

    /// Decode a stored envelope. Envelopes of any other type give `None`.
    pub fn from_envelope(envelope: &Envelope) -> Result<Option<Self>> {
        if !is_subscription_event(&envelope.event_type) {
            return Ok(None);
        }
        envelope.decode().map(Some)
    }
}

pub fn is_subscription_event(event_type: &str) -> bool {
    SUBSCRIPTION_EVENT_TYPES.contains(&event_type)
}
