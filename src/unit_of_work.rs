//! Tracking and committing producers with pending changes.
//!
//! A [`UnitOfWork`] holds producers (subscriptions, aggregates) whose
//! changes are not durable yet. [`UnitOfWork::commit`] persists them one at
//! a time, first in first out, through the first [`Persister`] that
//! supports each producer.
//!
//! Failure handling:
//!
//! - a concurrency conflict aborts the commit and drops the producer, since
//!   its expected version is known to be wrong
//! - any other error puts the producer back at the front of the queue so a
//!   later commit retries it

use crate::dao::{SubscriptionDao, SubscriptionRecord};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::store::EventStore;
use crate::types::{ProducerId, Version};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a producer's changes are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProducerKind {
    /// Pending changes are events appended to an event store.
    EventSourced,
    /// Pending changes are a flat record saved through a DAO.
    Record,
}

/// Anything with changes waiting to be persisted.
pub trait Producer: Send {
    fn producer_id(&self) -> ProducerId;

    fn kind(&self) -> ProducerKind;

    /// Version the store is expected to hold.
    fn committed_version(&self) -> Version;

    fn has_pending(&self) -> bool;

    fn pending_events(&self) -> Vec<Envelope>;

    /// Accept pending changes as durable.
    fn mark_committed(&mut self);

    fn to_record(&self) -> Option<SubscriptionRecord> {
        None
    }
}

/// A producer shared between its owner and a unit of work.
pub type SharedProducer = Arc<Mutex<dyn Producer>>;

/// Writes a producer's pending changes somewhere durable.
pub trait Persister: Send + Sync {
    fn supports(&self, kind: ProducerKind) -> bool;

    fn persist(&self, producer: &dyn Producer) -> Result<()>;
}

/// Appends pending events to an event store.
pub struct EventStorePersister {
    store: Arc<dyn EventStore>,
}

impl EventStorePersister {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

impl Persister for EventStorePersister {
    fn supports(&self, kind: ProducerKind) -> bool {
        kind == ProducerKind::EventSourced
    }

    fn persist(&self, producer: &dyn Producer) -> Result<()> {
        let events = producer.pending_events();
        if events.is_empty() {
            return Ok(());
        }
        self.store
            .add(&producer.producer_id(), producer.committed_version(), events)
    }
}

/// Saves flat subscription records.
pub struct DaoPersister {
    dao: Arc<dyn SubscriptionDao>,
}

impl DaoPersister {
    pub fn new(dao: Arc<dyn SubscriptionDao>) -> Self {
        Self { dao }
    }
}

impl Persister for DaoPersister {
    fn supports(&self, kind: ProducerKind) -> bool {
        kind == ProducerKind::Record
    }

    fn persist(&self, producer: &dyn Producer) -> Result<()> {
        if !producer.has_pending() {
            return Ok(());
        }
        let record = producer.to_record().ok_or_else(|| {
            Error::ObjectNotSupported(format!("{} has no record form", producer.producer_id()))
        })?;

        let expected = producer.committed_version();
        let actual = self
            .dao
            .one(&record.listener_id)?
            .map(|stored| stored.version)
            .unwrap_or_default();
        if actual != expected {
            return Err(Error::ConcurrentWriteDetected {
                id: producer.producer_id(),
                expected,
                actual,
            });
        }
        self.dao.save(&record)
    }
}

/// Producers waiting to be committed.
pub struct UnitOfWork {
    persisters: Vec<Arc<dyn Persister>>,
    pending: Mutex<VecDeque<(ProducerId, SharedProducer)>>,
    committing: AtomicBool,
}

impl UnitOfWork {
    pub fn new(persisters: Vec<Arc<dyn Persister>>) -> Self {
        Self {
            persisters,
            pending: Mutex::new(VecDeque::new()),
            committing: AtomicBool::new(false),
        }
    }

    /// Unit of work writing event-sourced producers to `store`.
    pub fn for_store(store: Arc<dyn EventStore>) -> Self {
        Self::new(vec![Arc::new(EventStorePersister::new(store))])
    }

    /// Unit of work saving record producers through `dao`.
    pub fn for_dao(dao: Arc<dyn SubscriptionDao>) -> Self {
        Self::new(vec![Arc::new(DaoPersister::new(dao))])
    }

    /// Track `producer`. Adding a producer already tracked is a no-op.
    pub fn add(&self, producer: SharedProducer) -> Result<()> {
        let (id, kind) = {
            let guard = producer.lock();
            (guard.producer_id(), guard.kind())
        };
        if self.persister(kind).is_none() {
            return Err(Error::ObjectNotSupported(format!(
                "no persister for {} ({:?})",
                id, kind
            )));
        }

        let mut pending = self.pending.lock();
        if !pending.iter().any(|(tracked, _)| *tracked == id) {
            pending.push_back((id, producer));
        }
        Ok(())
    }

    pub fn remove(&self, id: &ProducerId) {
        self.pending.lock().retain(|(tracked, _)| tracked != id);
    }

    pub fn has(&self, id: &ProducerId) -> bool {
        self.pending.lock().iter().any(|(tracked, _)| tracked == id)
    }

    pub fn count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every tracked producer without persisting it.
    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Persist tracked producers lazily, yielding each once it is durable.
    ///
    /// A commit started while another one is in progress yields nothing.
    /// The first error ends the sequence.
    pub fn commit(&self) -> Commit<'_> {
        let owner = self
            .committing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !owner {
            tracing::trace!("commit already in progress");
        }
        Commit {
            unit: self,
            owner,
            active: owner,
        }
    }

    /// Run [`commit`](Self::commit) to the end, returning how many
    /// producers were persisted.
    pub fn commit_all(&self) -> Result<usize> {
        let mut committed = 0;
        for producer in self.commit() {
            producer?;
            committed += 1;
        }
        Ok(committed)
    }

    fn persister(&self, kind: ProducerKind) -> Option<&Arc<dyn Persister>> {
        self.persisters.iter().find(|p| p.supports(kind))
    }

    fn commit_next(&self) -> Option<Result<SharedProducer>> {
        let (id, producer) = self.pending.lock().pop_front()?;

        let result = {
            let mut guard = producer.lock();
            match self.persister(guard.kind()) {
                Some(persister) => persister.persist(&*guard).map(|()| {
                    guard.mark_committed();
                    guard.committed_version()
                }),
                None => Err(Error::ObjectNotSupported(format!("no persister for {}", id))),
            }
        };

        match result {
            Ok(version) => {
                tracing::debug!(producer = %id, version = %version, "committed");
                Some(Ok(producer))
            }
            Err(e) if e.is_concurrency_conflict() => {
                tracing::debug!(producer = %id, error = %e, "commit aborted by conflict");
                Some(Err(e))
            }
            Err(e) => {
                tracing::warn!(producer = %id, error = %e, "commit failed, will retry");
                self.pending.lock().push_front((id, producer));
                Some(Err(e))
            }
        }
    }
}

/// Lazy commit returned by [`UnitOfWork::commit`].
pub struct Commit<'a> {
    unit: &'a UnitOfWork,
    owner: bool,
    active: bool,
}

impl Iterator for Commit<'_> {
    type Item = Result<SharedProducer>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.active {
            return None;
        }
        match self.unit.commit_next() {
            Some(Ok(producer)) => Some(Ok(producer)),
            Some(Err(e)) => {
                self.active = false;
                Some(Err(e))
            }
            None => {
                self.active = false;
                None
            }
        }
    }
}

impl Drop for Commit<'_> {
    fn drop(&mut self) {
        if self.owner {
            self.unit.committing.store(false, Ordering::Release);
        }
    }
}
