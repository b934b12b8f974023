//! Skip redundant saves.

use super::{SubscriptionDao, SubscriptionRecord};
use crate::error::Result;
use crate::types::{ListenerId, Version};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Default number of listener ids whose last version is remembered.
const DEFAULT_CAPACITY: usize = 1024;

/// Remembers the last version saved or loaded per listener and drops
/// saves of a record whose version has not moved since.
pub struct IdentityMappingDao<D> {
    inner: D,
    versions: Mutex<LruCache<ListenerId, Version>>,
}

impl<D: SubscriptionDao> IdentityMappingDao<D> {
    pub fn new(inner: D) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(inner: D, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            versions: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn remember(&self, record: &SubscriptionRecord) {
        self.versions
            .lock()
            .put(record.listener_id.clone(), record.version);
    }
}

impl<D: SubscriptionDao> SubscriptionDao for IdentityMappingDao<D> {
    fn save(&self, record: &SubscriptionRecord) -> Result<()> {
        if self.versions.lock().get(&record.listener_id) == Some(&record.version) {
            tracing::trace!(
                subscription = %record.listener_id,
                version = %record.version,
                "skipping save of unchanged record"
            );
            return Ok(());
        }
        self.inner.save(record)?;
        self.remember(record);
        Ok(())
    }

    fn one(&self, id: &ListenerId) -> Result<Option<SubscriptionRecord>> {
        let record = self.inner.one(id)?;
        if let Some(ref record) = record {
            self.remember(record);
        }
        Ok(record)
    }

    fn exists(&self, id: &ListenerId) -> Result<bool> {
        self.inner.exists(id)
    }

    fn all(&self, kinds: &[String], completed: Option<bool>) -> Result<Vec<SubscriptionRecord>> {
        let records = self.inner.all(kinds, completed)?;
        for record in &records {
            self.remember(record);
        }
        Ok(records)
    }
}
