//! Explicit event-type to handler registration.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Handler for one concrete event type.
pub type Handler<L> = Box<dyn Fn(&mut L, &Envelope) -> Result<bool> + Send + Sync>;

/// Maps each event type to exactly one handler on a listener `L`.
///
/// A listener typically builds its registry once and routes
/// [`Listener::on`](super::Listener::on) through [`dispatch`](Self::dispatch).
/// Events without a registered handler are reported as ignored.
pub struct HandlerRegistry<L> {
    handlers: BTreeMap<String, Handler<L>>,
}

impl<L> HandlerRegistry<L> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler. Registering a second handler for the same event
    /// type fails.
    pub fn register<F>(&mut self, event_type: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&mut L, &Envelope) -> Result<bool> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        if self.handlers.contains_key(&event_type) {
            return Err(Error::DuplicateHandler(event_type));
        }
        self.handlers.insert(event_type, Box::new(handler));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn on<F>(mut self, event_type: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(&mut L, &Envelope) -> Result<bool> + Send + Sync + 'static,
    {
        self.register(event_type, handler)?;
        Ok(self)
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn dispatch(&self, listener: &mut L, event: &Envelope) -> Result<bool> {
        match self.handlers.get(&event.event_type) {
            Some(handler) => handler(listener, event),
            None => Ok(false),
        }
    }
}

impl<L> Default for HandlerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> fmt::Debug for HandlerRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProducerId, Timestamp, Version};
    use serde_json::json;

    #[derive(Default)]
    struct Totals {
        paid: u64,
        refunded: u64,
    }

    fn event(event_type: &str, amount: u64) -> Envelope {
        Envelope::new(
            event_type,
            ProducerId::new("invoice", "1"),
            Version(1),
            Timestamp(0),
            json!({ "amount": amount }),
        )
    }

    fn registry() -> HandlerRegistry<Totals> {
        HandlerRegistry::new()
            .on("paid", |t: &mut Totals, e: &Envelope| {
                t.paid += e.payload["amount"].as_u64().unwrap_or(0);
                Ok(true)
            })
            .unwrap()
            .on("refunded", |t: &mut Totals, e: &Envelope| {
                t.refunded += e.payload["amount"].as_u64().unwrap_or(0);
                Ok(true)
            })
            .unwrap()
    }

    #[test]
    fn test_dispatch_routes_by_type() {
        let registry = registry();
        let mut totals = Totals::default();

        assert!(registry.dispatch(&mut totals, &event("paid", 10)).unwrap());
        assert!(registry.dispatch(&mut totals, &event("refunded", 3)).unwrap());
        assert!(!registry.dispatch(&mut totals, &event("issued", 99)).unwrap());

        assert_eq!(totals.paid, 10);
        assert_eq!(totals.refunded, 3);
        assert_eq!(registry.event_types(), vec!["paid", "refunded"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let result = registry().on("paid", |_: &mut Totals, _: &Envelope| Ok(true));
        assert!(matches!(result, Err(Error::DuplicateHandler(t)) if t == "paid"));
    }
}
