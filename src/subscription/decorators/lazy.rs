//! Load a subscription on first use.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::repository::Repository;
use crate::store::EventStore;
use crate::subscription::{Limit, Status, Subscription};
use crate::types::ListenerId;
use std::sync::Arc;

/// Looks its subscription up in a repository the first time it is needed,
/// then keeps it.
///
/// Fails with `SubscriptionNotFound` if the repository has no subscription
/// for the listener.
pub struct LazyLoadedSubscription<R: Repository> {
    id: ListenerId,
    repository: Arc<R>,
    loaded: Option<R::Subscription>,
}

impl<R: Repository> LazyLoadedSubscription<R> {
    pub fn new(id: ListenerId, repository: Arc<R>) -> Self {
        Self {
            id,
            repository,
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn resolve(&mut self) -> Result<&mut R::Subscription> {
        if self.loaded.is_none() {
            let subscription = self
                .repository
                .find(&self.id)?
                .ok_or_else(|| Error::SubscriptionNotFound(self.id.clone()))?;
            tracing::debug!(subscription = %self.id, "subscription loaded");
            self.loaded = Some(subscription);
        }
        self.loaded
            .as_mut()
            .ok_or_else(|| Error::SubscriptionNotFound(self.id.clone()))
    }
}

impl<R: Repository> Subscription for LazyLoadedSubscription<R> {
    type Cursor = <R::Subscription as Subscription>::Cursor;

    fn listener_id(&self) -> ListenerId {
        self.id.clone()
    }

    fn status(&mut self) -> Result<Status> {
        self.resolve()?.status()
    }

    fn start_for(&mut self, event: &Envelope) -> Result<()> {
        self.resolve()?.start_for(event)
    }

    fn restart(&mut self) -> Result<()> {
        self.resolve()?.restart()
    }

    fn pause(&mut self) -> Result<()> {
        self.resolve()?.pause()
    }

    fn unpause(&mut self) -> Result<()> {
        self.resolve()?.unpause()
    }

    fn open(&mut self, limit: Limit) -> Result<Self::Cursor> {
        self.resolve()?.open(limit)
    }

    fn advance(&mut self, cursor: &mut Self::Cursor, store: &dyn EventStore) -> Result<Option<Envelope>> {
        self.resolve()?.advance(cursor, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::InMemoryDao;
    use crate::listener::testing::{Capabilities, RecordingFactory, RecordingListener};
    use crate::listener::ListenerFactories;
    use crate::repository::DaoRepository;
    use crate::subscription::{DaoSubscription, FlatRecordFactory, SubscriptionFactory};
    use crate::types::{FixedClock, ProducerId, Timestamp, Version};
    use crate::unit_of_work::UnitOfWork;
    use serde_json::json;

    fn repository() -> Arc<DaoRepository> {
        let dao = Arc::new(InMemoryDao::new());
        let unit = Arc::new(UnitOfWork::for_dao(dao.clone()));
        let clock = Arc::new(FixedClock::default());
        Arc::new(DaoRepository::new(
            dao,
            ListenerFactories::new().with(Arc::new(RecordingFactory {
                starts_on: "placed".into(),
            })),
            FlatRecordFactory::new(clock),
            unit,
        ))
    }

    #[test]
    fn test_missing_subscription() {
        let mut lazy = LazyLoadedSubscription::new(ListenerId::new("recorder", "nobody"), repository());
        assert_eq!(lazy.listener_id(), ListenerId::new("recorder", "nobody"));
        assert!(!lazy.is_loaded());
        assert!(matches!(lazy.status(), Err(Error::SubscriptionNotFound(_))));
    }

    #[test]
    fn test_loads_once_on_first_use() {
        let repository = repository();
        let trigger = Envelope::new("placed", ProducerId::new("order", "1"), Version(1), Timestamp(0), json!({}));

        let mut subscription: DaoSubscription = FlatRecordFactory::new(Arc::new(FixedClock::default()))
            .create(Box::new(RecordingListener::new("a", Capabilities::default())));
        subscription.start_for(&trigger).unwrap();
        repository.add(subscription).unwrap();
        repository.commit().unwrap();

        let mut lazy = LazyLoadedSubscription::new(ListenerId::new("recorder", "a"), repository);
        assert!(!lazy.is_loaded());
        let status = lazy.status().unwrap();
        assert!(lazy.is_loaded());
        assert_eq!(status.started_by, Some(trigger));
        assert!(status.starting);

        lazy.pause().unwrap();
        assert!(lazy.status().unwrap().paused);
    }
}
