//! The subscription proper: lifecycle plus the resumable streaming loop.

use super::events::{
    SubscriptionEvent, SUBSCRIPTION_COMPLETED, SUBSCRIPTION_EVENT_TYPES, SUBSCRIPTION_IGNORED_EVENT,
    SUBSCRIPTION_LISTENED_TO_EVENT, SUBSCRIPTION_LISTENERS_STATE_CHANGED, SUBSCRIPTION_PAUSED,
    SUBSCRIPTION_RESTARTED, SUBSCRIPTION_STARTED, SUBSCRIPTION_UNPAUSED,
};
use super::machine::Machine;
use super::persistence::{EventSourced, FlatRecord, Persistence};
use super::{Limit, Status, Subscription, SubscriptionFactory};
use crate::dao::SubscriptionRecord;
use crate::envelope::{Envelope, EventStream, StreamIter};
use crate::error::{Error, Result};
use crate::listener::{Listener, ListenerState};
use crate::store::EventStore;
use crate::types::{Clock, ListenerId, ProducerId, Version};
use crate::unit_of_work::{Producer, ProducerKind};
use std::fmt;
use std::sync::Arc;

/// Producer kind of every subscription.
pub const SUBSCRIPTION_PRODUCER_KIND: &str = "subscription";

/// Producer id under which the subscription of `listener` is stored.
pub fn subscription_id(listener: &ListenerId) -> ProducerId {
    ProducerId::new(SUBSCRIPTION_PRODUCER_KIND, listener.to_string())
}

/// Subscription that records its lifecycle as its own events.
pub type EventSourcedSubscription = ListenerSubscription<EventSourced>;

/// Subscription stored as a flat record through a DAO.
pub type DaoSubscription = ListenerSubscription<FlatRecord>;

/// A listener, its lifecycle and a persistence strategy.
pub struct ListenerSubscription<P> {
    listener: Box<dyn Listener>,
    listener_id: ListenerId,
    producer_id: ProducerId,
    clock: Arc<dyn Clock>,
    machine: Machine,
    persistence: P,
}

/// Position of one `subscribe_to` call.
pub struct ListenerCursor {
    limit: Limit,
    /// Events this call may still consume; `None` is unbounded.
    remaining: Option<usize>,
    pass: Option<StreamIter>,
    consumed_in_pass: usize,
    done: bool,
}

impl ListenerCursor {
    fn new(limit: Limit) -> Self {
        let remaining = match limit {
            Limit::InitialStream => None,
            Limit::AtMost(n) => Some(n.get()),
        };
        Self {
            limit,
            remaining,
            pass: None,
            consumed_in_pass: 0,
            done: false,
        }
    }
}

impl<P: Persistence> ListenerSubscription<P> {
    pub fn with_persistence(listener: Box<dyn Listener>, clock: Arc<dyn Clock>, persistence: P) -> Self {
        let listener_id = listener.id();
        Self {
            producer_id: subscription_id(&listener_id),
            listener,
            listener_id,
            clock,
            machine: Machine::default(),
            persistence,
        }
    }

    pub fn listener_id(&self) -> &ListenerId {
        &self.listener_id
    }

    pub fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    pub fn listener(&self) -> &dyn Listener {
        self.listener.as_ref()
    }

    pub fn started(&self) -> bool {
        self.machine.started()
    }

    pub fn started_by(&self) -> Option<&Envelope> {
        self.machine.started_by.as_ref()
    }

    pub fn starting(&self) -> bool {
        self.machine.starting
    }

    pub fn paused(&self) -> bool {
        self.machine.paused
    }

    pub fn completed(&self) -> bool {
        self.machine.completed
    }

    pub fn last_processed_event(&self) -> Option<&Envelope> {
        self.machine.last_processed.as_ref()
    }

    pub fn last_state(&self) -> Option<&ListenerState> {
        self.machine.last_state.as_ref()
    }

    pub fn version(&self) -> Version {
        self.persistence.version()
    }

    fn transition(&mut self, event: SubscriptionEvent) -> Result<()> {
        self.persistence.record(&self.producer_id, &event)?;
        self.machine.apply(&event);
        tracing::trace!(
            subscription = %self.listener_id,
            event = event.event_type(),
            version = %self.persistence.version(),
            "subscription transition"
        );
        Ok(())
    }

    /// Process one event and record the outcome.
    fn listen_to_event(&mut self, event: &Envelope) -> Result<()> {
        if self.machine.starting {
            if let Some(resettable) = self.listener.as_resettable() {
                resettable.reset()?;
            }
        }

        let listened = self.listener.on(event)?;
        let at = self.clock.now();
        let outcome = if listened {
            SubscriptionEvent::ListenedToEvent { event: event.clone(), at }
        } else {
            SubscriptionEvent::IgnoredEvent { event: event.clone(), at }
        };
        self.transition(outcome)?;

        let state = match self.listener.as_stateful() {
            Some(stateful) => Some(stateful.to_state(ListenerState::empty())?),
            None => None,
        };
        if let Some(state) = state {
            let changed = match self.machine.last_state {
                Some(ref last) => *last != state,
                None => !state.is_empty(),
            };
            if changed {
                self.transition(SubscriptionEvent::ListenersStateChanged { state, at })?;
            }
        }

        if self.listener.as_completable().map_or(false, |c| c.completed()) {
            self.transition(SubscriptionEvent::Completed { by: event.clone(), at })?;
            tracing::debug!(subscription = %self.listener_id, "subscription completed");
        }
        Ok(())
    }

    /// Build the stream of one pass over the store.
    fn pass_stream(&self, store: &dyn EventStore) -> Result<EventStream> {
        let mut stream = store.stream(None)?.without(&SUBSCRIPTION_EVENT_TYPES);
        if let Some(filterer) = self.listener.as_filterer() {
            stream = filterer.filter(stream);
        }

        if !self.machine.starting {
            if let Some(ref last) = self.machine.last_processed {
                return Ok(stream.after(last));
            }
        }
        let from = match self.listener.as_picker() {
            Some(picker) if self.machine.starting => picker.pick(store)?,
            _ => self
                .machine
                .started_by
                .clone()
                .ok_or_else(|| Error::SubscriptionNotStartedYet(self.listener_id.clone()))?,
        };
        Ok(stream.from(&from))
    }

    fn status_snapshot(&self) -> Status {
        Status {
            listener_id: self.listener_id.clone(),
            started_by: self.machine.started_by.clone(),
            starting: self.machine.starting,
            paused: self.machine.paused,
            completed: self.machine.completed,
            last_processed_event: self.machine.last_processed.clone(),
            version: self.persistence.version(),
        }
    }
}

impl EventSourcedSubscription {
    pub fn new(listener: Box<dyn Listener>, clock: Arc<dyn Clock>) -> Self {
        Self::with_persistence(listener, clock, EventSourced::new())
    }

    /// Rebuild from the subscription's own stored events.
    ///
    /// Only the events needed to reconstruct the current state are applied:
    /// the start/restart/completion history, then the latest position and
    /// pause change, then the latest listener state.
    pub fn replay(&mut self, stream: &EventStream) -> Result<()> {
        let Some(last) = stream.last() else {
            return Ok(());
        };
        // Bookkeeping appended while replaying belongs to a later reload.
        let frozen = stream.to(&last);

        let mut anchor = None;
        for envelope in frozen.only(&[SUBSCRIPTION_STARTED, SUBSCRIPTION_RESTARTED, SUBSCRIPTION_COMPLETED]) {
            if envelope.is(SUBSCRIPTION_STARTED) || envelope.is(SUBSCRIPTION_RESTARTED) {
                anchor = Some(envelope.clone());
            }
            self.replay_one(&envelope);
        }

        if !self.machine.completed {
            let since_start = match anchor {
                Some(ref anchor) => frozen.after(anchor),
                None => frozen.clone(),
            };

            if let Some(position) = since_start
                .only(&[SUBSCRIPTION_LISTENED_TO_EVENT, SUBSCRIPTION_IGNORED_EVENT])
                .last()
            {
                self.replay_one(&position);
            }
            if let Some(pause) = frozen.only(&[SUBSCRIPTION_PAUSED, SUBSCRIPTION_UNPAUSED]).last() {
                self.replay_one(&pause);
            }
            if let Some(state) = since_start.only(&[SUBSCRIPTION_LISTENERS_STATE_CHANGED]).last() {
                self.replay_one(&state);
                if let (Some(stateful), Some(state)) =
                    (self.listener.as_stateful(), self.machine.last_state.as_ref())
                {
                    stateful.from_state(state)?;
                }
            }
        }

        self.persistence.restore(last.version);
        tracing::debug!(
            subscription = %self.listener_id,
            version = %last.version,
            "subscription replayed"
        );
        Ok(())
    }

    fn replay_one(&mut self, envelope: &Envelope) {
        match SubscriptionEvent::from_envelope(envelope) {
            Ok(Some(event)) => self.machine.apply(&event),
            Ok(None) => tracing::warn!(
                subscription = %self.listener_id,
                event_type = %envelope.event_type,
                "skipping unknown event during replay"
            ),
            Err(e) => tracing::warn!(
                subscription = %self.listener_id,
                event_type = %envelope.event_type,
                error = %e,
                "skipping undecodable event during replay"
            ),
        }
    }
}

impl DaoSubscription {
    pub fn new(listener: Box<dyn Listener>, clock: Arc<dyn Clock>) -> Self {
        Self::with_persistence(listener, clock, FlatRecord::new())
    }

    /// Hydrate from a stored record.
    pub fn from_record(
        mut listener: Box<dyn Listener>,
        clock: Arc<dyn Clock>,
        record: &SubscriptionRecord,
    ) -> Result<Self> {
        if listener.id() != record.listener_id {
            return Err(Error::InvalidOperation(format!(
                "record of {} given to listener {}",
                record.listener_id,
                listener.id()
            )));
        }
        if let (Some(stateful), Some(state)) = (listener.as_stateful(), record.state.as_ref()) {
            stateful.from_state(state)?;
        }

        let mut subscription = Self::with_persistence(listener, clock, FlatRecord::from_record(record));
        subscription.machine = FlatRecord::machine(record);
        Ok(subscription)
    }

    pub fn to_record(&self) -> Option<SubscriptionRecord> {
        self.persistence.to_record(&self.listener_id, &self.machine)
    }
}

impl<P: Persistence> Subscription for ListenerSubscription<P> {
    type Cursor = ListenerCursor;

    fn listener_id(&self) -> ListenerId {
        self.listener_id.clone()
    }

    fn status(&mut self) -> Result<Status> {
        Ok(self.status_snapshot())
    }

    fn start_for(&mut self, event: &Envelope) -> Result<()> {
        let started = self.machine.start(&self.listener_id, event, self.clock.now())?;
        self.transition(started)?;
        tracing::debug!(subscription = %self.listener_id, by = ?event, "subscription started");
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        let resettable = self.listener.as_resettable().is_some();
        if let Some(restarted) = self.machine.restart(&self.listener_id, resettable, self.clock.now())? {
            self.transition(restarted)?;
            tracing::debug!(subscription = %self.listener_id, "subscription restarted");
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(paused) = self.machine.pause(&self.listener_id, self.clock.now())? {
            self.transition(paused)?;
            tracing::debug!(subscription = %self.listener_id, "subscription paused");
        }
        Ok(())
    }

    fn unpause(&mut self) -> Result<()> {
        if let Some(unpaused) = self.machine.unpause(&self.listener_id, self.clock.now())? {
            self.transition(unpaused)?;
            tracing::debug!(subscription = %self.listener_id, "subscription unpaused");
        }
        Ok(())
    }

    fn open(&mut self, limit: Limit) -> Result<ListenerCursor> {
        self.machine.ensure_can_stream(&self.listener_id)?;
        Ok(ListenerCursor::new(limit))
    }

    fn advance(&mut self, cursor: &mut ListenerCursor, store: &dyn EventStore) -> Result<Option<Envelope>> {
        loop {
            if cursor.done || self.machine.completed || cursor.remaining == Some(0) {
                cursor.done = true;
                return Ok(None);
            }

            if cursor.pass.is_none() {
                cursor.pass = Some(self.pass_stream(store)?.iter());
                cursor.consumed_in_pass = 0;
            }

            if let Some(event) = cursor.pass.as_mut().and_then(Iterator::next) {
                self.listen_to_event(&event)?;
                cursor.consumed_in_pass += 1;
                if let Some(ref mut remaining) = cursor.remaining {
                    *remaining -= 1;
                }
                return Ok(Some(event));
            }

            // Pass exhausted. Only a bounded call that found something goes
            // back for events appended meanwhile.
            cursor.pass = None;
            if cursor.limit == Limit::InitialStream || cursor.consumed_in_pass == 0 {
                cursor.done = true;
                return Ok(None);
            }
            tracing::trace!(
                subscription = %self.listener_id,
                consumed = cursor.consumed_in_pass,
                "catching up with appended events"
            );
        }
    }
}

impl<P: Persistence> Producer for ListenerSubscription<P> {
    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> ProducerKind {
        self.persistence.kind()
    }

    fn committed_version(&self) -> Version {
        self.persistence.committed_version()
    }

    fn has_pending(&self) -> bool {
        self.persistence.has_pending()
    }

    fn pending_events(&self) -> Vec<Envelope> {
        self.persistence.pending_events()
    }

    fn mark_committed(&mut self) {
        self.persistence.mark_committed();
    }

    fn to_record(&self) -> Option<SubscriptionRecord> {
        self.persistence.to_record(&self.listener_id, &self.machine)
    }
}

impl<P: Persistence> fmt::Debug for ListenerSubscription<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSubscription")
            .field("listener_id", &self.listener_id)
            .field("state", &self.machine.state())
            .field("last_processed", &self.machine.last_processed)
            .field("version", &self.persistence.version())
            .finish()
    }
}

/// Builds [`EventSourcedSubscription`]s.
#[derive(Clone)]
pub struct EventSourcedFactory {
    clock: Arc<dyn Clock>,
}

impl EventSourcedFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

impl SubscriptionFactory for EventSourcedFactory {
    type Subscription = EventSourcedSubscription;

    fn create(&self, listener: Box<dyn Listener>) -> EventSourcedSubscription {
        EventSourcedSubscription::new(listener, Arc::clone(&self.clock))
    }
}

/// Builds [`DaoSubscription`]s.
#[derive(Clone)]
pub struct FlatRecordFactory {
    clock: Arc<dyn Clock>,
}

impl FlatRecordFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

impl SubscriptionFactory for FlatRecordFactory {
    type Subscription = DaoSubscription;

    fn create(&self, listener: Box<dyn Listener>) -> DaoSubscription {
        DaoSubscription::new(listener, Arc::clone(&self.clock))
    }
}
