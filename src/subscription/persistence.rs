//! How a subscription's progress is made durable.
//!
//! Both strategies are driven by the same [`Machine`]: every transition is
//! applied to it and then handed to the strategy to [`record`](Persistence::record).

use super::events::SubscriptionEvent;
use super::machine::Machine;
use crate::dao::SubscriptionRecord;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::types::{ListenerId, ProducerId, Timestamp, Version};
use crate::unit_of_work::ProducerKind;

/// Persistence strategy of a subscription.
pub trait Persistence: Send {
    fn kind(&self) -> ProducerKind;

    /// Record a transition.
    fn record(&mut self, producer: &ProducerId, event: &SubscriptionEvent) -> Result<()>;

    /// Version including uncommitted transitions.
    fn version(&self) -> Version;

    /// Version last known to be durable.
    fn committed_version(&self) -> Version;

    fn has_pending(&self) -> bool {
        self.version() != self.committed_version()
    }

    fn pending_events(&self) -> Vec<Envelope>;

    fn mark_committed(&mut self);

    /// Flat form of the subscription, for strategies that store one.
    fn to_record(&self, listener: &ListenerId, machine: &Machine) -> Option<SubscriptionRecord>;
}

/// The subscription is its own event-sourced aggregate.
#[derive(Debug, Default)]
pub struct EventSourced {
    committed: Version,
    pending: Vec<Envelope>,
}

impl EventSourced {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a stored history whose last event has `version`.
    pub(crate) fn restore(&mut self, version: Version) {
        self.committed = version;
        self.pending.clear();
    }
}

impl Persistence for EventSourced {
    fn kind(&self) -> ProducerKind {
        ProducerKind::EventSourced
    }

    fn record(&mut self, producer: &ProducerId, event: &SubscriptionEvent) -> Result<()> {
        let version = self.version().next();
        self.pending.push(event.to_envelope(producer.clone(), version)?);
        Ok(())
    }

    fn version(&self) -> Version {
        self.committed.advance(self.pending.len())
    }

    fn committed_version(&self) -> Version {
        self.committed
    }

    fn pending_events(&self) -> Vec<Envelope> {
        self.pending.clone()
    }

    fn mark_committed(&mut self) {
        self.committed = self.version();
        self.pending.clear();
    }

    fn to_record(&self, _listener: &ListenerId, _machine: &Machine) -> Option<SubscriptionRecord> {
        None
    }
}

/// The subscription is a flat record updated in place.
#[derive(Debug, Default)]
pub struct FlatRecord {
    started_at: Option<Timestamp>,
    paused_at: Option<Timestamp>,
    last_event_processed_at: Option<Timestamp>,
    version: Version,
    committed: Version,
}

impl FlatRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_record(record: &SubscriptionRecord) -> Self {
        Self {
            started_at: record.started_at,
            paused_at: record.paused_at,
            last_event_processed_at: record.last_event_processed_at,
            version: record.version,
            committed: record.version,
        }
    }

    /// Lifecycle fields implied by a stored record.
    pub(crate) fn machine(record: &SubscriptionRecord) -> Machine {
        let started = record.started_by.is_some();
        Machine {
            started_by: record.started_by.clone(),
            starting: started && !record.completed && record.last_processed_event.is_none(),
            paused: record.paused_at.is_some(),
            completed: record.completed,
            last_processed: record.last_processed_event.clone(),
            last_state: record.state.clone(),
        }
    }
}

impl Persistence for FlatRecord {
    fn kind(&self) -> ProducerKind {
        ProducerKind::Record
    }

    fn record(&mut self, _producer: &ProducerId, event: &SubscriptionEvent) -> Result<()> {
        match event {
            SubscriptionEvent::Started { at, .. } => {
                self.started_at = Some(*at);
                self.paused_at = None;
                self.last_event_processed_at = None;
            }
            SubscriptionEvent::Restarted { .. } => self.last_event_processed_at = None,
            SubscriptionEvent::Paused { at } => self.paused_at = Some(*at),
            SubscriptionEvent::Unpaused { .. } => self.paused_at = None,
            SubscriptionEvent::ListenedToEvent { at, .. }
            | SubscriptionEvent::IgnoredEvent { at, .. } => {
                self.last_event_processed_at = Some(*at);
            }
            SubscriptionEvent::ListenersStateChanged { .. } | SubscriptionEvent::Completed { .. } => {}
        }
        self.version = self.version.next();
        Ok(())
    }

    fn version(&self) -> Version {
        self.version
    }

    fn committed_version(&self) -> Version {
        self.committed
    }

    fn pending_events(&self) -> Vec<Envelope> {
        Vec::new()
    }

    fn mark_committed(&mut self) {
        self.committed = self.version;
    }

    fn to_record(&self, listener: &ListenerId, machine: &Machine) -> Option<SubscriptionRecord> {
        Some(SubscriptionRecord {
            listener_id: listener.clone(),
            state: machine.last_state.clone(),
            started_by: machine.started_by.clone(),
            started_at: self.started_at,
            paused_at: self.paused_at,
            last_processed_event: machine.last_processed.clone(),
            last_event_processed_at: self.last_event_processed_at,
            completed: machine.completed,
            version: self.version,
        })
    }
}
