//! Listeners and their optional capabilities.
//!
//! A [`Listener`] reacts to events via [`Listener::on`]. Everything else is
//! optional and orthogonal: a listener opts into a capability by returning
//! itself from the matching `as_*` accessor.
//!
//! - [`Filterer`]: narrows the stream to the event types it cares about
//! - [`Picker`]: chooses the historical event its stream starts from
//! - [`Resettable`]: can forget everything and replay from scratch
//! - [`Completable`]: reports when its work is done
//! - [`Stateful`]: exports and imports a [`ListenerState`]

mod handlers;
mod state;

pub use handlers::{Handler, HandlerRegistry};
pub use state::ListenerState;

use crate::envelope::{Envelope, EventStream};
use crate::error::{Error, Result};
use crate::store::EventStore;
use crate::types::ListenerId;
use std::sync::Arc;

/// A consumer of events driven by a subscription.
pub trait Listener: Send {
    fn id(&self) -> ListenerId;

    /// React to an event. `true` means the event was consumed, `false`
    /// that it was ignored.
    fn on(&mut self, event: &Envelope) -> Result<bool>;

    fn as_filterer(&self) -> Option<&dyn Filterer> {
        None
    }

    fn as_picker(&self) -> Option<&dyn Picker> {
        None
    }

    fn as_resettable(&mut self) -> Option<&mut dyn Resettable> {
        None
    }

    fn as_completable(&self) -> Option<&dyn Completable> {
        None
    }

    fn as_stateful(&mut self) -> Option<&mut dyn Stateful> {
        None
    }
}

/// Restricts which events a listener is given.
pub trait Filterer {
    fn filter(&self, stream: EventStream) -> EventStream;
}

/// Chooses the event a freshly started stream begins from.
pub trait Picker {
    fn pick(&self, store: &dyn EventStore) -> Result<Envelope>;
}

pub trait Resettable {
    fn reset(&mut self) -> Result<()>;
}

pub trait Completable {
    fn completed(&self) -> bool;
}

/// Exports and imports auxiliary listener memory.
pub trait Stateful {
    /// Write the listener's memory into `state` and return it.
    fn to_state(&self, state: ListenerState) -> Result<ListenerState>;

    fn from_state(&mut self, state: &ListenerState) -> Result<()>;
}

/// Builds listeners, either by id or in response to an event.
pub trait ListenerFactory: Send + Sync {
    /// Listener kind this factory builds.
    fn kind(&self) -> &str;

    fn create(&self, id: &ListenerId) -> Result<Box<dyn Listener>>;

    /// Create the listener an event should start.
    ///
    /// Fails with [`Error::InvalidEventGiven`](crate::Error::InvalidEventGiven)
    /// when this factory has no listener for the event.
    fn create_for(&self, event: &Envelope) -> Result<Box<dyn Listener>>;
}

/// Listener factories, looked up by listener kind.
#[derive(Clone, Default)]
pub struct ListenerFactories {
    factories: Vec<Arc<dyn ListenerFactory>>,
}

impl ListenerFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, factory: Arc<dyn ListenerFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Add a factory. A later factory for the same kind takes precedence.
    pub fn register(&mut self, factory: Arc<dyn ListenerFactory>) {
        self.factories.retain(|f| f.kind() != factory.kind());
        self.factories.push(factory);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ListenerFactory>> {
        self.factories.iter().find(|f| f.kind() == kind)
    }

    /// Create the listener with `id` through the factory of its kind.
    pub fn create(&self, id: &ListenerId) -> Result<Box<dyn Listener>> {
        let factory = self
            .get(&id.kind)
            .ok_or_else(|| Error::ObjectNotSupported(format!("no listener factory for kind {}", id.kind)))?;
        factory.create(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ListenerFactory>> {
        self.factories.iter()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
