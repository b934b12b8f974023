//! In-memory event store.

use super::{EventStore, Ledger, Transactional};
use crate::envelope::{Envelope, EventStream, Filter};
use crate::error::Result;
use crate::types::{EventId, ProducerId, Version};
use parking_lot::RwLock;

/// Event store kept entirely in memory.
#[derive(Default)]
pub struct InMemoryEventStore {
    ledger: RwLock<Ledger>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            ledger: RwLock::new(Ledger::new()),
        }
    }

    /// Number of committed events.
    pub fn len(&self) -> usize {
        self.ledger.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for InMemoryEventStore {
    fn stream(&self, filter: Option<&Filter>) -> Result<EventStream> {
        Ok(self.ledger.read().stream(filter))
    }

    fn add(&self, producer: &ProducerId, expected: Version, events: Vec<Envelope>) -> Result<()> {
        let mut ledger = self.ledger.write();
        ledger.check(producer, expected, &events)?;
        ledger.append(producer, events);
        Ok(())
    }

    fn event(&self, id: EventId) -> Result<Option<Envelope>> {
        Ok(self.ledger.read().event(id))
    }

    fn version(&self, producer: &ProducerId) -> Result<Version> {
        Ok(self.ledger.read().version(producer))
    }
}

impl Transactional for InMemoryEventStore {
    fn begin(&self) -> Result<()> {
        self.ledger.write().begin()
    }

    fn commit(&self) -> Result<()> {
        let count = self.ledger.write().commit()?;
        tracing::debug!(events = count, "in-memory transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let count = self.ledger.write().rollback()?;
        tracing::debug!(events = count, "in-memory transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.ledger.read().in_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::types::Timestamp;
    use serde_json::json;

    fn order() -> ProducerId {
        ProducerId::new("order", "1")
    }

    fn event(version: u64) -> Envelope {
        Envelope::new("placed", order(), Version(version), Timestamp(0), json!({}))
    }

    #[test]
    fn test_add_and_stream() {
        let store = InMemoryEventStore::new();
        store.add(&order(), Version(0), vec![event(1), event(2)]).unwrap();

        assert_eq!(store.stream(None).unwrap().len(), 2);
        assert_eq!(store.version(&order()).unwrap(), Version(2));

        let other = ProducerId::new("order", "2");
        assert!(store.stream(Some(&Filter::producer(other))).unwrap().empty());
    }

    #[test]
    fn test_stale_expected_version_is_a_conflict() {
        let store = InMemoryEventStore::new();
        store.add(&order(), Version(0), vec![event(1)]).unwrap();

        let result = store.add(&order(), Version(0), vec![event(1)]);
        match result {
            Err(Error::ConcurrentWriteDetected { id, expected, actual }) => {
                assert_eq!(id, order());
                assert_eq!(expected, Version(0));
                assert_eq!(actual, Version(1));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rejects_foreign_or_gapped_events() {
        let store = InMemoryEventStore::new();

        let result = store.add(&order(), Version(0), vec![event(2)]);
        assert!(matches!(result, Err(Error::InvalidOperation(_))));

        let foreign = Envelope::new("placed", ProducerId::new("x", "y"), Version(1), Timestamp(0), json!({}));
        let result = store.add(&order(), Version(0), vec![foreign]);
        assert!(matches!(result, Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_transaction_visibility_and_rollback() {
        let store = InMemoryEventStore::new();
        store.begin().unwrap();
        store.add(&order(), Version(0), vec![event(1)]).unwrap();

        assert!(store.in_transaction());
        assert_eq!(store.stream(None).unwrap().len(), 1);
        assert_eq!(store.version(&order()).unwrap(), Version(1));

        store.rollback().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.version(&order()).unwrap(), Version(0));

        store.begin().unwrap();
        store.add(&order(), Version(0), vec![event(1)]).unwrap();
        store.commit().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_transaction_misuse() {
        let store = InMemoryEventStore::new();
        assert!(matches!(store.commit(), Err(Error::Transaction(_))));
        store.begin().unwrap();
        assert!(matches!(store.begin(), Err(Error::Transaction(_))));
    }
}
