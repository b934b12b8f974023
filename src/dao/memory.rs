//! In-memory subscription DAO.

use super::{SubscriptionDao, SubscriptionRecord};
use crate::error::Result;
use crate::types::ListenerId;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Records kept in a map, ordered by listener id.
#[derive(Default)]
pub struct InMemoryDao {
    records: RwLock<BTreeMap<ListenerId, SubscriptionRecord>>,
    writes: AtomicU64,
}

impl InMemoryDao {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls that reached this DAO.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriptionDao for InMemoryDao {
    fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        self.records
            .write()
            .insert(record.listener_id.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn one(&self, id: &ListenerId) -> Result<Option<SubscriptionRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn exists(&self, id: &ListenerId) -> Result<bool> {
        Ok(self.records.read().contains_key(id))
    }

    fn all(&self, kinds: &[String], completed: Option<bool>) -> Result<Vec<SubscriptionRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.matches(kinds, completed))
            .cloned()
            .collect())
    }
}
