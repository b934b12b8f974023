//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use eventline::{
    Completable, Envelope, Error, EventStore, HandlerRegistry, Listener, ListenerFactory, ListenerId,
    ListenerState, ProducerId, Resettable, Result, Stateful, Timestamp,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Send crate logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING.call_once(|| {
        if std::env::var_os("RUST_LOG").is_some() {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        }
    });
}

/// What a projection did, observable after it was boxed away.
#[derive(Debug, Default)]
pub struct Counters {
    pub handled: AtomicUsize,
    pub resets: AtomicUsize,
}

impl Counters {
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

/// Sums what was paid for one order. Finishes on `closed` when completable.
pub struct OrderProjection {
    id: ListenerId,
    paid: u64,
    closed: bool,
    completable: bool,
    counters: Arc<Counters>,
    handlers: Arc<HandlerRegistry<OrderProjection>>,
}

impl OrderProjection {
    pub fn new(order: &str, completable: bool, counters: Arc<Counters>) -> Self {
        Self {
            id: ListenerId::new("projection", order),
            paid: 0,
            closed: false,
            completable,
            counters,
            handlers: Arc::new(Self::handlers()),
        }
    }

    fn handlers() -> HandlerRegistry<OrderProjection> {
        HandlerRegistry::new()
            .on("placed", |_: &mut OrderProjection, _: &Envelope| Ok(true))
            .and_then(|h| {
                h.on("paid", |p: &mut OrderProjection, e: &Envelope| {
                    p.paid += e.payload["amount"].as_u64().unwrap_or(0);
                    Ok(true)
                })
            })
            .and_then(|h| {
                h.on("closed", |p: &mut OrderProjection, _: &Envelope| {
                    p.closed = true;
                    Ok(true)
                })
            })
            .unwrap()
    }
}

impl Listener for OrderProjection {
    fn id(&self) -> ListenerId {
        self.id.clone()
    }

    fn on(&mut self, event: &Envelope) -> Result<bool> {
        self.counters.handled.fetch_add(1, Ordering::SeqCst);
        let handlers = Arc::clone(&self.handlers);
        handlers.dispatch(self, event)
    }

    fn as_resettable(&mut self) -> Option<&mut dyn Resettable> {
        Some(self)
    }

    fn as_completable(&self) -> Option<&dyn Completable> {
        if self.completable {
            Some(self)
        } else {
            None
        }
    }

    fn as_stateful(&mut self) -> Option<&mut dyn Stateful> {
        Some(self)
    }
}

impl Resettable for OrderProjection {
    fn reset(&mut self) -> Result<()> {
        self.paid = 0;
        self.closed = false;
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Completable for OrderProjection {
    fn completed(&self) -> bool {
        self.closed
    }
}

impl Stateful for OrderProjection {
    fn to_state(&self, state: ListenerState) -> Result<ListenerState> {
        state.set("paid", self.paid)
    }

    fn from_state(&mut self, state: &ListenerState) -> Result<()> {
        self.paid = state.get_as("paid")?.unwrap_or(0);
        Ok(())
    }
}

/// Starts an [`OrderProjection`] for every placed order.
pub struct ProjectionFactory {
    pub completable: bool,
    pub counters: Arc<Counters>,
}

impl ProjectionFactory {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            completable: false,
            counters,
        }
    }
}

impl ListenerFactory for ProjectionFactory {
    fn kind(&self) -> &str {
        "projection"
    }

    fn create(&self, id: &ListenerId) -> Result<Box<dyn Listener>> {
        Ok(Box::new(OrderProjection::new(
            &id.id,
            self.completable,
            Arc::clone(&self.counters),
        )))
    }

    fn create_for(&self, event: &Envelope) -> Result<Box<dyn Listener>> {
        if !event.is("placed") {
            return Err(Error::InvalidEventGiven(event.event_type.clone()));
        }
        self.create(&ListenerId::new("projection", event.producer_id.id.clone()))
    }
}

/// Append one event of `order` at its next version.
pub fn append(store: &dyn EventStore, order: &str, event_type: &str, payload: Value) -> Envelope {
    let producer = ProducerId::new("order", order);
    let version = store.version(&producer).unwrap();
    let event = Envelope::new(
        event_type,
        producer.clone(),
        version.next(),
        Timestamp(version.0 as i64),
        payload,
    );
    store.add(&producer, version, vec![event.clone()]).unwrap();
    event
}

pub fn paid(store: &dyn EventStore, order: &str, amount: u64) -> Envelope {
    append(store, order, "paid", json!({ "amount": amount }))
}

pub fn projection(order: &str, completable: bool) -> (Box<dyn Listener>, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    (
        Box::new(OrderProjection::new(order, completable, Arc::clone(&counters))),
        counters,
    )
}
