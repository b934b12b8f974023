//! Core identifier, version and time types.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identity of anything that produces events: an aggregate, a listener, a
/// subscription.
///
/// The `kind` names the type of producer and `id` its string form, so two
/// producers of different kinds never collide even when their ids do.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProducerId {
    pub kind: String,
    pub id: String,
}

impl ProducerId {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Parse the `kind/id` display form. The kind ends at the first `/`;
    /// a `/` or `%` inside the kind is escaped as `%2F` or `%25`.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once('/')?;
        if kind.is_empty() {
            return None;
        }
        Some(Self::new(unescape_kind(kind)?, id))
    }
}

fn unescape_kind(escaped: &str) -> Option<String> {
    let mut kind = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(at) = rest.find('%') {
        kind.push_str(&rest[..at]);
        let code = rest.get(at + 1..at + 3)?;
        match code {
            "2F" | "2f" => kind.push('/'),
            "25" => kind.push('%'),
            _ => return None,
        }
        rest = &rest[at + 3..];
    }
    kind.push_str(rest);
    Some(kind)
}

impl fmt::Debug for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProducerId({})", self)
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.kind.chars() {
            match c {
                '/' => f.write_str("%2F")?,
                '%' => f.write_str("%25")?,
                c => write!(f, "{}", c)?,
            }
        }
        write!(f, "/{}", self.id)
    }
}

/// Listeners are identified exactly like any other producer.
pub type ListenerId = ProducerId;

/// Process-wide unique identifier of an event envelope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn random() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-producer version. Version 0 means "nothing written yet".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }

    pub fn advance(self, by: usize) -> Self {
        Version(self.0 + by as u64)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Source of time for subscriptions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Useful in tests.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = at;
    }

    /// Move the clock forward by `micros`.
    pub fn tick(&self, micros: i64) {
        self.now.lock().0 += micros;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_id_display() {
        let id = ProducerId::new("projector", "orders");
        assert_eq!(id.to_string(), "projector/orders");
        assert_eq!(format!("{:?}", id), "ProducerId(projector/orders)");
    }

    #[test]
    fn test_producer_id_parse() {
        let id = ProducerId::new("projector", "orders/eu");
        assert_eq!(ProducerId::parse(&id.to_string()), Some(id));
        assert_eq!(ProducerId::parse("no-separator"), None);
        assert_eq!(ProducerId::parse("/orphan"), None);
    }

    #[test]
    fn test_kinds_with_separators_round_trip() {
        for (kind, id) in [("a/b", "c"), ("billing/eu", "7/x"), ("100%", "1"), ("%2F", "")] {
            let producer = ProducerId::new(kind, id);
            assert_eq!(ProducerId::parse(&producer.to_string()), Some(producer));
        }
        assert_eq!(ProducerId::new("a/b", "c").to_string(), "a%2Fb/c");
        assert_eq!(ProducerId::parse("a%zz/c"), None);
        assert_eq!(ProducerId::parse("a%2/c"), None);
    }

    #[test]
    fn test_producer_ids_differ_by_kind() {
        assert_ne!(ProducerId::new("a", "1"), ProducerId::new("b", "1"));
    }

    #[test]
    fn test_version_navigation() {
        assert_eq!(Version(5).next(), Version(6));
        assert_eq!(Version(5).advance(3), Version(8));
        assert_eq!(Version::default(), Version(0));
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock::new(Timestamp(100));
        assert_eq!(clock.now(), Timestamp(100));
        clock.tick(50);
        assert_eq!(clock.now(), Timestamp(150));
        clock.set(Timestamp(7));
        assert_eq!(clock.now(), Timestamp(7));
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(EventId::random(), EventId::random());
    }
}
