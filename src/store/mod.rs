//! Append-only event stores.
//!
//! Subscriptions only rely on the [`EventStore`] contract: an ordered,
//! filterable stream of envelopes and an optimistic-concurrency `add`.
//! Two implementations ship with the crate:
//!
//! - [`InMemoryEventStore`]: everything lives in memory
//! - [`FileEventStore`]: a checksummed append-only log on disk
//!
//! Both are [`Transactional`]: writes made between `begin` and `commit` are
//! visible through the same handle and dropped on `rollback`.

mod file;
mod ledger;
mod memory;

pub use file::{FileEventStore, FileStoreConfig};
pub use memory::InMemoryEventStore;

pub(crate) use ledger::Ledger;

use crate::envelope::{Envelope, EventStream, Filter};
use crate::error::Result;
use crate::types::{EventId, ProducerId, Version};

/// An append-only, ordered log of envelopes.
pub trait EventStore: Send + Sync {
    /// Snapshot of the events matching `filter`, in store order.
    fn stream(&self, filter: Option<&Filter>) -> Result<EventStream>;

    /// Append `events` for `producer`.
    ///
    /// Fails with [`Error::ConcurrentWriteDetected`](crate::Error::ConcurrentWriteDetected)
    /// when `expected` is not the producer's current version. Events must
    /// belong to `producer` and carry consecutive versions following
    /// `expected`.
    fn add(&self, producer: &ProducerId, expected: Version, events: Vec<Envelope>) -> Result<()>;

    fn event(&self, id: EventId) -> Result<Option<Envelope>>;

    /// Current version of `producer`; `Version(0)` if it never wrote.
    fn version(&self, producer: &ProducerId) -> Result<Version>;
}

/// Store-level transactions.
pub trait Transactional: Send + Sync {
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    fn in_transaction(&self) -> bool;
}
