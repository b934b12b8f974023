//! Start subscriptions in response to events.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::listener::ListenerFactories;
use crate::repository::Repository;
use crate::subscription::{Subscription, SubscriptionFactory};
use crate::types::ListenerId;
use std::sync::Arc;

/// Asks every listener factory whether an event should start one of its
/// listeners, and registers a started subscription for each that does.
///
/// A factory declines with `InvalidEventGiven`. Listeners that already
/// have a subscription are left alone.
pub struct Subscriber<R, F> {
    listeners: ListenerFactories,
    factory: F,
    repository: Arc<R>,
}

impl<R, F> Subscriber<R, F>
where
    R: Repository,
    F: SubscriptionFactory<Subscription = R::Subscription>,
{
    pub fn new(listeners: ListenerFactories, factory: F, repository: Arc<R>) -> Self {
        Self {
            listeners,
            factory,
            repository,
        }
    }

    /// Handle `event`, returning the listeners whose subscriptions it started.
    ///
    /// New subscriptions are added to the repository, not committed.
    pub fn on(&self, event: &Envelope) -> Result<Vec<ListenerId>> {
        let mut started = Vec::new();
        for factory in self.listeners.iter() {
            let listener = match factory.create_for(event) {
                Ok(listener) => listener,
                Err(Error::InvalidEventGiven(_)) => continue,
                Err(e) => return Err(e),
            };

            let id = listener.id();
            if self.repository.has(&id)? {
                tracing::trace!(subscription = %id, "already subscribed");
                continue;
            }

            let mut subscription = self.factory.create(listener);
            subscription.start_for(event)?;
            self.repository.add(subscription)?;
            tracing::debug!(subscription = %id, by = ?event, "subscribed");
            started.push(id);
        }
        Ok(started)
    }
}
