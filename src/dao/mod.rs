//! Flat subscription records and the DAOs that store them.

mod file;
mod identity;
mod memory;

pub use file::{FileDao, FileDaoConfig};
pub use identity::IdentityMappingDao;
pub use memory::InMemoryDao;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::listener::ListenerState;
use crate::types::{ListenerId, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// Stored form of a DAO-backed subscription.
///
/// Whether the subscription is starting or paused is derived: starting
/// means started, not completed and nothing processed yet; paused means
/// `paused_at` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub listener_id: ListenerId,
    pub state: Option<ListenerState>,
    pub started_by: Option<Envelope>,
    pub started_at: Option<Timestamp>,
    pub paused_at: Option<Timestamp>,
    pub last_processed_event: Option<Envelope>,
    pub last_event_processed_at: Option<Timestamp>,
    pub completed: bool,
    pub version: Version,
}

impl SubscriptionRecord {
    /// Record of a subscription that was never started.
    pub fn new(listener_id: ListenerId) -> Self {
        Self {
            listener_id,
            state: None,
            started_by: None,
            started_at: None,
            paused_at: None,
            last_processed_event: None,
            last_event_processed_at: None,
            completed: false,
            version: Version(0),
        }
    }

    /// Whether this record passes a kind/completion filter. No kinds means
    /// every kind.
    pub fn matches(&self, kinds: &[String], completed: Option<bool>) -> bool {
        (kinds.is_empty() || kinds.contains(&self.listener_id.kind))
            && completed.map_or(true, |c| c == self.completed)
    }
}

/// Storage of subscription records keyed by listener id.
pub trait SubscriptionDao: Send + Sync {
    /// Insert or replace the record for its listener.
    fn save(&self, record: &SubscriptionRecord) -> Result<()>;

    fn one(&self, id: &ListenerId) -> Result<Option<SubscriptionRecord>>;

    fn exists(&self, id: &ListenerId) -> Result<bool> {
        Ok(self.one(id)?.is_some())
    }

    /// Records of the given listener kinds (all kinds if empty), optionally
    /// restricted by completion.
    fn all(&self, kinds: &[String], completed: Option<bool>) -> Result<Vec<SubscriptionRecord>>;
}
