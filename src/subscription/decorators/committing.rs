//! Commit after every mutating step.

use crate::envelope::Envelope;
use crate::error::Result;
use crate::store::EventStore;
use crate::subscription::{Limit, Status, Subscription};
use crate::types::ListenerId;
use crate::unit_of_work::{Producer, SharedProducer, UnitOfWork};
use parking_lot::Mutex;
use std::sync::Arc;

/// Commits the unit of work after each lifecycle call and after each
/// consumed event.
///
/// On failure the unit of work is cleared, dropping whatever was not yet
/// committed, and the error is returned unchanged.
pub struct CommittingSubscription<S> {
    inner: Arc<Mutex<S>>,
    unit: Arc<UnitOfWork>,
}

impl<S> CommittingSubscription<S>
where
    S: Subscription + Producer + 'static,
{
    pub fn new(inner: S, unit: Arc<UnitOfWork>) -> Self {
        Self::shared(Arc::new(Mutex::new(inner)), unit)
    }

    /// Wrap a subscription that is shared with someone else.
    pub fn shared(inner: Arc<Mutex<S>>, unit: Arc<UnitOfWork>) -> Self {
        Self { inner, unit }
    }

    pub fn inner(&self) -> &Arc<Mutex<S>> {
        &self.inner
    }

    fn committed<T>(&self, operation: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        let producer: SharedProducer = self.inner.clone();
        let result = self.unit.add(Arc::clone(&producer)).and_then(|()| {
            // The lock must be released before committing.
            let value = operation(&mut self.inner.lock())?;
            self.unit.commit_all()?;
            // Commit drops the producer; keep tracking it.
            self.unit.add(producer)?;
            Ok(value)
        });

        if let Err(ref e) = result {
            tracing::debug!(
                subscription = %self.listener_id(),
                error = %e,
                "clearing unit of work after failure"
            );
            self.unit.clear();
        }
        result
    }
}

impl<S> Subscription for CommittingSubscription<S>
where
    S: Subscription + Producer + 'static,
{
    type Cursor = S::Cursor;

    fn listener_id(&self) -> ListenerId {
        self.inner.lock().listener_id()
    }

    fn status(&mut self) -> Result<Status> {
        self.inner.lock().status()
    }

    fn start_for(&mut self, event: &Envelope) -> Result<()> {
        self.committed(|s| s.start_for(event))
    }

    fn restart(&mut self) -> Result<()> {
        self.committed(|s| s.restart())
    }

    fn pause(&mut self) -> Result<()> {
        self.committed(|s| s.pause())
    }

    fn unpause(&mut self) -> Result<()> {
        self.committed(|s| s.unpause())
    }

    fn open(&mut self, limit: Limit) -> Result<S::Cursor> {
        self.inner.lock().open(limit)
    }

    fn advance(&mut self, cursor: &mut S::Cursor, store: &dyn EventStore) -> Result<Option<Envelope>> {
        self.committed(|s| s.advance(cursor, store))
    }
}
