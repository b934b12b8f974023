//! In-memory bookkeeping shared by the store implementations.

use crate::envelope::{Envelope, EventStream, Filter};
use crate::error::{Error, Result};
use crate::types::{EventId, ProducerId, Version};
use std::collections::HashMap;

/// Writes made inside an open transaction.
#[derive(Default)]
struct Staged {
    events: Vec<Envelope>,
    versions: HashMap<ProducerId, Version>,
}

/// Ordered events plus per-producer versions, with optional staging.
#[derive(Default)]
pub(crate) struct Ledger {
    events: Vec<Envelope>,
    versions: HashMap<ProducerId, Version>,
    staged: Option<Staged>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load already-durable events, trusting their order.
    pub fn restore(&mut self, event: Envelope) {
        let version = self.versions.entry(event.producer_id.clone()).or_default();
        *version = (*version).max(event.version);
        self.events.push(event);
    }

    pub fn version(&self, producer: &ProducerId) -> Version {
        if let Some(ref staged) = self.staged {
            if let Some(version) = staged.versions.get(producer) {
                return *version;
            }
        }
        self.versions.get(producer).copied().unwrap_or_default()
    }

    /// Validate an append without performing it.
    pub fn check(&self, producer: &ProducerId, expected: Version, events: &[Envelope]) -> Result<()> {
        let actual = self.version(producer);
        if actual != expected {
            return Err(Error::ConcurrentWriteDetected {
                id: producer.clone(),
                expected,
                actual,
            });
        }

        let mut next = expected;
        for event in events {
            next = next.next();
            if &event.producer_id != producer {
                return Err(Error::InvalidOperation(format!(
                    "event {} belongs to {}, not {}",
                    event.id, event.producer_id, producer
                )));
            }
            if event.version != next {
                return Err(Error::InvalidOperation(format!(
                    "event {} has version {}, expected {}",
                    event.id, event.version, next
                )));
            }
        }
        Ok(())
    }

    /// Append already-checked events, staging them if a transaction is open.
    pub fn append(&mut self, producer: &ProducerId, events: Vec<Envelope>) {
        let Some(last) = events.last().map(|e| e.version) else {
            return;
        };
        match self.staged {
            Some(ref mut staged) => {
                staged.versions.insert(producer.clone(), last);
                staged.events.extend(events);
            }
            None => {
                self.versions.insert(producer.clone(), last);
                self.events.extend(events);
            }
        }
    }

    pub fn stream(&self, filter: Option<&Filter>) -> EventStream {
        let staged = self.staged.iter().flat_map(|s| s.events.iter());
        let events: Vec<Envelope> = self
            .events
            .iter()
            .chain(staged)
            .filter(|e| filter.map_or(true, |f| f.matches(e)))
            .cloned()
            .collect();
        EventStream::new(events)
    }

    pub fn event(&self, id: EventId) -> Option<Envelope> {
        let staged = self.staged.iter().flat_map(|s| s.events.iter());
        self.events.iter().chain(staged).find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    // --- Transactions ---

    pub fn in_transaction(&self) -> bool {
        self.staged.is_some()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.staged.is_some() {
            return Err(Error::Transaction("transaction already in progress".into()));
        }
        self.staged = Some(Staged::default());
        Ok(())
    }

    /// Events written since `begin`, in order.
    pub fn staged_events(&self) -> Result<&[Envelope]> {
        match self.staged {
            Some(ref staged) => Ok(&staged.events),
            None => Err(Error::Transaction("no transaction in progress".into())),
        }
    }

    pub fn commit(&mut self) -> Result<usize> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| Error::Transaction("no transaction in progress".into()))?;
        let count = staged.events.len();
        self.versions.extend(staged.versions);
        self.events.extend(staged.events);
        Ok(count)
    }

    pub fn rollback(&mut self) -> Result<usize> {
        let staged = self
            .staged
            .take()
            .ok_or_else(|| Error::Transaction("no transaction in progress".into()))?;
        Ok(staged.events.len())
    }
}
