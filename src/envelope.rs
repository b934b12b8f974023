//! Event envelopes and copy-on-write event streams.
//!
//! An [`EventStream`] is an immutable view over a snapshot of the store.
//! Every filtering operator returns a new stream sharing the same snapshot;
//! the original is never changed. Positional bounds are resolved by event
//! id in store order when the stream is iterated.

use crate::error::Result;
use crate::types::{EventId, ProducerId, Timestamp, Version};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A domain event plus delivery metadata.
///
/// Envelopes are immutable once created and compare equal by id only.
#[derive(Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EventId,
    pub event_type: String,
    pub producer_id: ProducerId,
    pub version: Version,
    pub timestamp: Timestamp,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(
        event_type: impl Into<String>,
        producer_id: ProducerId,
        version: Version,
        timestamp: Timestamp,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::random(),
            event_type: event_type.into(),
            producer_id,
            version,
            timestamp,
            payload,
        }
    }

    /// Create an envelope with a JSON-serialized payload.
    pub fn json(
        event_type: impl Into<String>,
        producer_id: ProducerId,
        version: Version,
        timestamp: Timestamp,
        payload: &impl Serialize,
    ) -> Result<Self> {
        Ok(Self::new(
            event_type,
            producer_id,
            version,
            timestamp,
            serde_json::to_value(payload)?,
        ))
    }

    /// Decode the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| crate::error::Error::Deserialization(e.to_string()))
    }

    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Envelope {}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope({} {} {} {:?})",
            self.event_type, self.producer_id, self.version, self.id
        )
    }
}

/// Selects which producers' events an [`EventStore`](crate::store::EventStore)
/// streams. An empty filter selects everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    pub producer_ids: Vec<ProducerId>,
    pub producer_kinds: Vec<String>,
}

impl Filter {
    /// Matches every event until narrowed.
    pub fn any() -> Self {
        Self::default()
    }

    /// Events of a single producer.
    pub fn producer(id: ProducerId) -> Self {
        Self {
            producer_ids: vec![id],
            producer_kinds: Vec::new(),
        }
    }

    pub fn with_producer_ids(mut self, ids: impl IntoIterator<Item = ProducerId>) -> Self {
        self.producer_ids.extend(ids);
        self
    }

    pub fn with_producer_kinds<S: Into<String>>(mut self, kinds: impl IntoIterator<Item = S>) -> Self {
        self.producer_kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.producer_ids.is_empty() && self.producer_kinds.is_empty()
    }

    pub fn matches(&self, event: &Envelope) -> bool {
        self.is_empty()
            || self.producer_ids.contains(&event.producer_id)
            || self.producer_kinds.contains(&event.producer_id.kind)
    }
}

#[derive(Clone, Copy, Debug)]
enum Bound {
    Inclusive(EventId),
    Exclusive(EventId),
}

impl Bound {
    fn id(&self) -> EventId {
        match self {
            Bound::Inclusive(id) | Bound::Exclusive(id) => *id,
        }
    }
}

/// Ordered, filterable, immutable view over events.
#[derive(Clone)]
pub struct EventStream {
    events: Arc<[Envelope]>,
    lower: Vec<Bound>,
    upper: Vec<Bound>,
    only: Option<Vec<String>>,
    without: Vec<String>,
    limit: Option<usize>,
}

impl EventStream {
    pub fn new(events: impl Into<Arc<[Envelope]>>) -> Self {
        Self {
            events: events.into(),
            lower: Vec::new(),
            upper: Vec::new(),
            only: None,
            without: Vec::new(),
            limit: None,
        }
    }

    pub fn empty_stream() -> Self {
        Self::new(Vec::new())
    }

    /// Start at `event`, inclusive.
    pub fn from(&self, event: &Envelope) -> Self {
        let mut stream = self.clone();
        stream.lower.push(Bound::Inclusive(event.id));
        stream
    }

    /// Start right after `event`.
    pub fn after(&self, event: &Envelope) -> Self {
        let mut stream = self.clone();
        stream.lower.push(Bound::Exclusive(event.id));
        stream
    }

    /// Stop at `event`, inclusive.
    pub fn to(&self, event: &Envelope) -> Self {
        let mut stream = self.clone();
        stream.upper.push(Bound::Inclusive(event.id));
        stream
    }

    /// Stop right before `event`.
    pub fn before(&self, event: &Envelope) -> Self {
        let mut stream = self.clone();
        stream.upper.push(Bound::Exclusive(event.id));
        stream
    }

    /// Keep only events of the given types. Repeated calls intersect.
    pub fn only<S: AsRef<str>>(&self, types: &[S]) -> Self {
        let types: Vec<String> = types.iter().map(|t| t.as_ref().to_string()).collect();
        let mut stream = self.clone();
        stream.only = Some(match stream.only.take() {
            Some(existing) => existing.into_iter().filter(|t| types.contains(t)).collect(),
            None => types,
        });
        stream
    }

    /// Drop events of the given types.
    pub fn without<S: AsRef<str>>(&self, types: &[S]) -> Self {
        let mut stream = self.clone();
        stream
            .without
            .extend(types.iter().map(|t| t.as_ref().to_string()));
        stream
    }

    /// Yield at most `n` events.
    pub fn limit(&self, n: usize) -> Self {
        let mut stream = self.clone();
        stream.limit = Some(stream.limit.map_or(n, |existing| existing.min(n)));
        stream
    }

    pub fn first(&self) -> Option<Envelope> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<Envelope> {
        if self.limit.is_some() {
            return self.iter().last();
        }
        let (start, end) = self.window()?;
        self.events[start..end]
            .iter()
            .rev()
            .find(|e| self.accepts(e))
            .cloned()
    }

    pub fn empty(&self) -> bool {
        self.first().is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn iter(&self) -> StreamIter {
        let (pos, end) = self.window().unwrap_or((0, 0));
        StreamIter {
            events: Arc::clone(&self.events),
            pos,
            end,
            only: self.only.clone(),
            without: self.without.clone(),
            remaining: self.limit,
        }
    }

    fn accepts(&self, event: &Envelope) -> bool {
        accepts(&self.only, &self.without, event)
    }

    /// Resolve positional bounds into a `[start, end)` window.
    ///
    /// A bound naming an event that is not part of the snapshot yields no
    /// window at all.
    fn window(&self) -> Option<(usize, usize)> {
        let mut start = 0;
        let mut end = self.events.len();

        for bound in &self.lower {
            let pos = self.position(bound.id())?;
            start = start.max(match bound {
                Bound::Inclusive(_) => pos,
                Bound::Exclusive(_) => pos + 1,
            });
        }

        for bound in &self.upper {
            let pos = self.position(bound.id())?;
            end = end.min(match bound {
                Bound::Inclusive(_) => pos + 1,
                Bound::Exclusive(_) => pos,
            });
        }

        if start >= end {
            return None;
        }
        Some((start, end))
    }

    fn position(&self, id: EventId) -> Option<usize> {
        // Resumption bounds are almost always near the tail.
        self.events.iter().rposition(|e| e.id == id)
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("snapshot_len", &self.events.len())
            .field("lower", &self.lower)
            .field("upper", &self.upper)
            .field("only", &self.only)
            .field("without", &self.without)
            .field("limit", &self.limit)
            .finish()
    }
}

impl From<Vec<Envelope>> for EventStream {
    fn from(events: Vec<Envelope>) -> Self {
        EventStream::new(events)
    }
}

impl IntoIterator for EventStream {
    type Item = Envelope;
    type IntoIter = StreamIter;

    fn into_iter(self) -> StreamIter {
        self.iter()
    }
}

impl IntoIterator for &EventStream {
    type Item = Envelope;
    type IntoIter = StreamIter;

    fn into_iter(self) -> StreamIter {
        self.iter()
    }
}

fn accepts(only: &Option<Vec<String>>, without: &[String], event: &Envelope) -> bool {
    if let Some(ref types) = only {
        if !types.contains(&event.event_type) {
            return false;
        }
    }
    !without.contains(&event.event_type)
}

/// Owning iterator over an [`EventStream`].
///
/// Holds its own handle on the snapshot, so it does not borrow the store
/// or the stream it came from.
pub struct StreamIter {
    events: Arc<[Envelope]>,
    pos: usize,
    end: usize,
    only: Option<Vec<String>>,
    without: Vec<String>,
    remaining: Option<usize>,
}

impl Iterator for StreamIter {
    type Item = Envelope;

    fn next(&mut self) -> Option<Envelope> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.pos < self.end {
            let event = &self.events[self.pos];
            self.pos += 1;
            if accepts(&self.only, &self.without, event) {
                if let Some(ref mut remaining) = self.remaining {
                    *remaining -= 1;
                }
                return Some(event.clone());
            }
        }
        None
    }
}
