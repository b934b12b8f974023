//! Durable, resumable subscriptions.
//!
//! A subscription drives one [`Listener`](crate::listener::Listener) over an
//! [`EventStore`], remembering the last event it handed over so that the
//! next call resumes right after it.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted --start_for--> Starting --first event--> Running --completed--> Completed
//!                              ^                         |
//!                              +--------restart----------+
//! ```
//!
//! `pause`/`unpause` toggle a flag on top of `Starting`/`Running` that blocks
//! streaming.
//!
//! ## Streaming
//!
//! Streaming is pull driven. [`Subscription::subscribe_to`] returns a lazy
//! iterator; every `next` processes exactly one event and records the
//! outcome before yielding it, so a caller may stop at any point and resume
//! later.

mod engine;
mod events;
mod machine;
mod persistence;

pub mod decorators;

pub use engine::{
    subscription_id, DaoSubscription, EventSourcedFactory, EventSourcedSubscription, FlatRecordFactory,
    ListenerCursor, ListenerSubscription, SUBSCRIPTION_PRODUCER_KIND,
};
pub use events::{
    is_subscription_event, SubscriptionEvent, SUBSCRIPTION_COMPLETED, SUBSCRIPTION_EVENT_TYPES,
    SUBSCRIPTION_IGNORED_EVENT, SUBSCRIPTION_LISTENED_TO_EVENT, SUBSCRIPTION_LISTENERS_STATE_CHANGED,
    SUBSCRIPTION_PAUSED, SUBSCRIPTION_RESTARTED, SUBSCRIPTION_STARTED, SUBSCRIPTION_UNPAUSED,
};
pub use machine::{Machine, State};
pub use persistence::{EventSourced, FlatRecord, Persistence};

use crate::envelope::Envelope;
use crate::error::Result;
use crate::listener::Listener;
use crate::store::EventStore;
use crate::types::{ListenerId, Version};
use std::num::NonZeroUsize;

/// How many events one `subscribe_to` call may consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    /// Consume the stream visible when the call starts, then stop. Events
    /// appended meanwhile wait for the next call.
    InitialStream,

    /// Consume up to `n` events, re-reading the store to catch up with
    /// events appended during the call.
    AtMost(NonZeroUsize),
}

impl From<Option<usize>> for Limit {
    fn from(limit: Option<usize>) -> Self {
        match limit.and_then(NonZeroUsize::new) {
            Some(n) => Limit::AtMost(n),
            None => Limit::InitialStream,
        }
    }
}

impl From<usize> for Limit {
    fn from(limit: usize) -> Self {
        Limit::from(Some(limit))
    }
}

/// Point-in-time view of a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub listener_id: ListenerId,
    pub started_by: Option<Envelope>,
    pub starting: bool,
    pub paused: bool,
    pub completed: bool,
    pub last_processed_event: Option<Envelope>,
    pub version: Version,
}

impl Status {
    pub fn started(&self) -> bool {
        self.started_by.is_some()
    }

    pub fn state(&self) -> State {
        if !self.started() {
            State::NotStarted
        } else if self.completed {
            State::Completed
        } else if self.paused {
            State::Paused
        } else if self.starting {
            State::Starting
        } else {
            State::Running
        }
    }
}

/// A durable cursor driving a listener over an event store.
///
/// Streaming is split in two so that decorators can wrap a single step:
/// [`open`](Self::open) validates preconditions and returns a cursor, and
/// [`advance`](Self::advance) consumes the next event.
pub trait Subscription: Send {
    type Cursor: Send;

    fn listener_id(&self) -> ListenerId;

    fn status(&mut self) -> Result<Status>;

    /// Start the subscription at `event`.
    fn start_for(&mut self, event: &Envelope) -> Result<()>;

    /// Start over from the beginning. Requires a resettable listener.
    fn restart(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn unpause(&mut self) -> Result<()>;

    /// Check that streaming is allowed and prepare a cursor.
    ///
    /// Fails with `SubscriptionNotStartedYet`, `SubscriptionAlreadyCompleted`
    /// or `SubscriptionPaused`, checked in that order.
    fn open(&mut self, limit: Limit) -> Result<Self::Cursor>;

    /// Consume the next event, or `None` once this call is exhausted.
    fn advance(&mut self, cursor: &mut Self::Cursor, store: &dyn EventStore) -> Result<Option<Envelope>>;

    /// Lazily stream events from `store` into the listener.
    fn subscribe_to<'a>(
        &'a mut self,
        store: &'a dyn EventStore,
        limit: impl Into<Limit>,
    ) -> Result<Events<'a, Self>>
    where
        Self: Sized,
    {
        let cursor = self.open(limit.into())?;
        Ok(Events {
            subscription: self,
            store,
            cursor,
            done: false,
        })
    }
}

/// Lazy sequence of consumed events returned by [`Subscription::subscribe_to`].
///
/// The first error ends the sequence.
pub struct Events<'a, S: Subscription> {
    subscription: &'a mut S,
    store: &'a dyn EventStore,
    cursor: S::Cursor,
    done: bool,
}

impl<S: Subscription> Iterator for Events<'_, S> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.subscription.advance(&mut self.cursor, self.store) {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Builds subscriptions for listeners.
pub trait SubscriptionFactory: Send + Sync {
    type Subscription: Subscription;

    fn create(&self, listener: Box<dyn Listener>) -> Self::Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_sentinels() {
        assert_eq!(Limit::from(None::<usize>), Limit::InitialStream);
        assert_eq!(Limit::from(0usize), Limit::InitialStream);
        assert_eq!(Limit::from(Some(0usize)), Limit::InitialStream);

        let three = NonZeroUsize::new(3).map(Limit::AtMost);
        assert_eq!(Some(Limit::from(3usize)), three);
    }
}
