//! Batch consumed events into store transactions.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::store::{EventStore, Transactional};
use crate::subscription::{Limit, Status, Subscription};
use crate::types::{ListenerId, Version};
use std::collections::VecDeque;
use std::sync::Arc;

/// Consumes up to `batch_size` events from the inner subscription inside
/// one transaction, and only hands them out once it has committed.
///
/// Lifecycle calls each run in their own transaction. Any error rolls the
/// open transaction back before it is returned.
///
/// A rollback does not rewind the inner subscription. If the rolled back
/// transaction had recorded progress, the decorator is poisoned: every
/// later call fails with [`Error::Transaction`] and the subscription has to
/// be loaded again from its repository.
pub struct TransactionalSubscription<S, T: ?Sized> {
    inner: S,
    connection: Arc<T>,
    batch_size: usize,
    poisoned: bool,
}

/// Cursor of a [`TransactionalSubscription`].
pub struct TransactionalCursor<C> {
    inner: C,
    buffer: VecDeque<Envelope>,
    exhausted: bool,
}

impl<S, T> TransactionalSubscription<S, T>
where
    S: Subscription,
    T: Transactional + ?Sized,
{
    /// A `batch_size` of 0 is treated as 1.
    pub fn new(inner: S, connection: Arc<T>, batch_size: usize) -> Self {
        Self {
            inner,
            connection,
            batch_size: batch_size.max(1),
            poisoned: false,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether a rolled back transaction left the inner subscription ahead
    /// of the store.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Transaction(format!(
                "subscription {} was rolled back and must be reloaded",
                self.inner.listener_id()
            )));
        }
        Ok(())
    }

    fn transactionally<R>(&mut self, operation: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        self.ensure_usable()?;
        let before = self.inner.status()?.version;
        self.connection.begin()?;
        let result = match operation(&mut self.inner) {
            Ok(value) => self.commit().map(|()| value),
            Err(e) => {
                self.rollback();
                Err(e)
            }
        };
        if result.is_err() {
            self.poison_if_moved(before);
        }
        result
    }

    fn poison_if_moved(&mut self, before: Version) {
        let moved = match self.inner.status() {
            Ok(status) => status.version != before,
            Err(_) => true,
        };
        if moved {
            self.poisoned = true;
            tracing::warn!(
                subscription = %self.inner.listener_id(),
                "rolled back progress; subscription must be reloaded"
            );
        }
    }

    fn commit(&self) -> Result<()> {
        self.connection.commit().map_err(|e| {
            self.rollback();
            e
        })
    }

    /// Roll back, keeping the original error as the one reported.
    fn rollback(&self) {
        if let Err(e) = self.connection.rollback() {
            tracing::warn!(
                subscription = %self.inner.listener_id(),
                error = %e,
                "rollback failed"
            );
        }
    }
}

impl<S, T> Subscription for TransactionalSubscription<S, T>
where
    S: Subscription,
    T: Transactional + ?Sized,
{
    type Cursor = TransactionalCursor<S::Cursor>;

    fn listener_id(&self) -> ListenerId {
        self.inner.listener_id()
    }

    fn status(&mut self) -> Result<Status> {
        self.inner.status()
    }

    fn start_for(&mut self, event: &Envelope) -> Result<()> {
        self.transactionally(|s| s.start_for(event))
    }

    fn restart(&mut self) -> Result<()> {
        self.transactionally(|s| s.restart())
    }

    fn pause(&mut self) -> Result<()> {
        self.transactionally(|s| s.pause())
    }

    fn unpause(&mut self) -> Result<()> {
        self.transactionally(|s| s.unpause())
    }

    fn open(&mut self, limit: Limit) -> Result<Self::Cursor> {
        self.ensure_usable()?;
        Ok(TransactionalCursor {
            inner: self.inner.open(limit)?,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    fn advance(&mut self, cursor: &mut Self::Cursor, store: &dyn EventStore) -> Result<Option<Envelope>> {
        self.ensure_usable()?;
        if let Some(event) = cursor.buffer.pop_front() {
            return Ok(Some(event));
        }
        if cursor.exhausted {
            return Ok(None);
        }

        let batch_size = self.batch_size;
        let inner_cursor = &mut cursor.inner;
        let buffer = &mut cursor.buffer;
        let exhausted = &mut cursor.exhausted;
        self.transactionally(|s| {
            while buffer.len() < batch_size {
                match s.advance(inner_cursor, store)? {
                    Some(event) => buffer.push_back(event),
                    None => {
                        *exhausted = true;
                        break;
                    }
                }
            }
            Ok(())
        })
        .map_err(|e| {
            cursor.buffer.clear();
            cursor.exhausted = true;
            e
        })?;

        tracing::trace!(
            subscription = %self.inner.listener_id(),
            events = cursor.buffer.len(),
            "transaction committed"
        );
        Ok(cursor.buffer.pop_front())
    }
}
