//! Finding and registering subscriptions.
//!
//! A repository loads subscriptions from wherever their strategy keeps them
//! and hands new ones to a [`UnitOfWork`]; nothing is written until the unit
//! of work commits.

use crate::dao::SubscriptionDao;
use crate::envelope::{EventStream, Filter};
use crate::error::Result;
use crate::listener::ListenerFactories;
use crate::store::EventStore;
use crate::subscription::{
    subscription_id, DaoSubscription, EventSourcedFactory, EventSourcedSubscription, FlatRecordFactory,
    Subscription, SubscriptionFactory, SUBSCRIPTION_PRODUCER_KIND,
};
use crate::types::{ListenerId, ProducerId};
use crate::unit_of_work::UnitOfWork;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Narrows [`Repository::all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepositoryFilter {
    /// Listener kinds; empty means every kind.
    pub kinds: Vec<String>,
    pub completed: Option<bool>,
}

impl RepositoryFilter {
    pub fn kinds<S: Into<String>>(kinds: impl IntoIterator<Item = S>) -> Self {
        Self {
            kinds: kinds.into_iter().map(Into::into).collect(),
            completed: None,
        }
    }

    pub fn with_completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    fn matches_kind(&self, kind: &str) -> bool {
        self.kinds.is_empty() || self.kinds.iter().any(|k| k == kind)
    }
}

/// Storage of subscriptions by listener id.
pub trait Repository: Send + Sync {
    type Subscription: Subscription;

    fn find(&self, id: &ListenerId) -> Result<Option<Self::Subscription>>;

    /// Whether a subscription exists, stored or waiting to be committed.
    fn has(&self, id: &ListenerId) -> Result<bool>;

    /// Queue a subscription for the next commit.
    fn add(&self, subscription: Self::Subscription) -> Result<()>;

    fn all(&self, filter: &RepositoryFilter) -> Result<Vec<Self::Subscription>>;
}

/// Subscriptions stored as their own events.
pub struct EventSourcedRepository {
    store: Arc<dyn EventStore>,
    listeners: ListenerFactories,
    factory: EventSourcedFactory,
    unit: Arc<UnitOfWork>,
}

impl EventSourcedRepository {
    pub fn new(
        store: Arc<dyn EventStore>,
        listeners: ListenerFactories,
        factory: EventSourcedFactory,
        unit: Arc<UnitOfWork>,
    ) -> Self {
        Self {
            store,
            listeners,
            factory,
            unit,
        }
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.unit
    }

    /// Commit everything queued so far.
    pub fn commit(&self) -> Result<usize> {
        self.unit.commit_all()
    }

    fn load(&self, id: &ListenerId, events: &EventStream) -> Result<EventSourcedSubscription> {
        let listener = self.listeners.create(id)?;
        let mut subscription = self.factory.create(listener);
        subscription.replay(events)?;
        Ok(subscription)
    }
}

impl Repository for EventSourcedRepository {
    type Subscription = EventSourcedSubscription;

    fn find(&self, id: &ListenerId) -> Result<Option<EventSourcedSubscription>> {
        let events = self.store.stream(Some(&Filter::producer(subscription_id(id))))?;
        if events.empty() {
            return Ok(None);
        }
        self.load(id, &events).map(Some)
    }

    fn has(&self, id: &ListenerId) -> Result<bool> {
        let producer = subscription_id(id);
        if self.unit.has(&producer) {
            return Ok(true);
        }
        Ok(!self.store.stream(Some(&Filter::producer(producer)))?.empty())
    }

    fn add(&self, subscription: EventSourcedSubscription) -> Result<()> {
        self.unit.add(Arc::new(Mutex::new(subscription)))
    }

    fn all(&self, filter: &RepositoryFilter) -> Result<Vec<EventSourcedSubscription>> {
        let stream = self
            .store
            .stream(Some(&Filter::any().with_producer_kinds([SUBSCRIPTION_PRODUCER_KIND])))?;

        let mut producers: BTreeMap<ProducerId, ListenerId> = BTreeMap::new();
        for event in &stream {
            if producers.contains_key(&event.producer_id) {
                continue;
            }
            match ListenerId::parse(&event.producer_id.id) {
                Some(listener) if filter.matches_kind(&listener.kind) => {
                    producers.insert(event.producer_id.clone(), listener);
                }
                Some(_) => {}
                None => tracing::warn!(
                    producer = %event.producer_id,
                    "subscription events with an unparseable listener id"
                ),
            }
        }

        let mut subscriptions = Vec::with_capacity(producers.len());
        for (producer, listener) in producers {
            let events = self.store.stream(Some(&Filter::producer(producer)))?;
            let subscription = self.load(&listener, &events)?;
            if let Some(completed) = filter.completed {
                if subscription.completed() != completed {
                    continue;
                }
            }
            subscriptions.push(subscription);
        }
        Ok(subscriptions)
    }
}

/// Subscriptions stored as flat records.
pub struct DaoRepository {
    dao: Arc<dyn SubscriptionDao>,
    listeners: ListenerFactories,
    factory: FlatRecordFactory,
    unit: Arc<UnitOfWork>,
}

impl DaoRepository {
    pub fn new(
        dao: Arc<dyn SubscriptionDao>,
        listeners: ListenerFactories,
        factory: FlatRecordFactory,
        unit: Arc<UnitOfWork>,
    ) -> Self {
        Self {
            dao,
            listeners,
            factory,
            unit,
        }
    }

    pub fn unit_of_work(&self) -> &Arc<UnitOfWork> {
        &self.unit
    }

    /// Commit everything queued so far.
    pub fn commit(&self) -> Result<usize> {
        self.unit.commit_all()
    }
}

impl Repository for DaoRepository {
    type Subscription = DaoSubscription;

    fn find(&self, id: &ListenerId) -> Result<Option<DaoSubscription>> {
        let Some(record) = self.dao.one(id)? else {
            return Ok(None);
        };
        let listener = self.listeners.create(id)?;
        DaoSubscription::from_record(listener, self.factory.clock(), &record).map(Some)
    }

    fn has(&self, id: &ListenerId) -> Result<bool> {
        if self.unit.has(&subscription_id(id)) {
            return Ok(true);
        }
        self.dao.exists(id)
    }

    fn add(&self, subscription: DaoSubscription) -> Result<()> {
        self.unit.add(Arc::new(Mutex::new(subscription)))
    }

    fn all(&self, filter: &RepositoryFilter) -> Result<Vec<DaoSubscription>> {
        self.dao
            .all(&filter.kinds, filter.completed)?
            .iter()
            .map(|record| {
                let listener = self.listeners.create(&record.listener_id)?;
                DaoSubscription::from_record(listener, self.factory.clock(), record)
            })
            .collect()
    }
}
