//! # Eventline
//!
//! Durable, resumable subscriptions for event-sourced systems.
//!
//! ## Core Concepts
//!
//! - **Envelopes**: Events plus delivery metadata, read through copy-on-write streams
//! - **Listeners**: Consumers with optional capabilities (filter, pick, reset, complete, state)
//! - **Subscriptions**: The durable cursor and state machine driving one listener
//! - **Units of work**: Commit pending progress with optimistic concurrency
//!
//! ## Example
//!
//! ```ignore
//! use eventline::{EventSourcedSubscription, InMemoryEventStore, Limit, Subscription, SystemClock};
//! use std::sync::Arc;
//!
//! let store = InMemoryEventStore::new();
//! let mut subscription = EventSourcedSubscription::new(Box::new(listener), Arc::new(SystemClock));
//!
//! subscription.start_for(&first_event)?;
//! for event in subscription.subscribe_to(&store, Limit::InitialStream)? {
//!     println!("consumed {:?}", event?);
//! }
//! ```

pub mod dao;
pub mod envelope;
pub mod error;
pub mod listener;
pub mod repository;
pub mod store;
pub mod subscriber;
pub mod subscription;
pub mod types;
pub mod unit_of_work;

// Re-exports
pub use dao::{FileDao, FileDaoConfig, IdentityMappingDao, InMemoryDao, SubscriptionDao, SubscriptionRecord};
pub use envelope::{Envelope, EventStream, Filter, StreamIter};
pub use error::{Error, Result};
pub use listener::{
    Completable, Filterer, Handler, HandlerRegistry, Listener, ListenerFactories, ListenerFactory,
    ListenerState, Picker, Resettable, Stateful,
};
pub use repository::{DaoRepository, EventSourcedRepository, Repository, RepositoryFilter};
pub use store::{EventStore, FileEventStore, FileStoreConfig, InMemoryEventStore, Transactional};
pub use subscriber::Subscriber;
pub use subscription::decorators::{CommittingSubscription, LazyLoadedSubscription, TransactionalSubscription};
pub use subscription::{
    DaoSubscription, EventSourcedFactory, EventSourcedSubscription, Events, FlatRecordFactory, Limit,
    ListenerSubscription, State, Status, Subscription, SubscriptionEvent, SubscriptionFactory,
};
pub use types::*;
pub use unit_of_work::{
    Commit, DaoPersister, EventStorePersister, Persister, Producer, ProducerKind, SharedProducer, UnitOfWork,
};
