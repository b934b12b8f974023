//! Property tests for event stream bounds and filters.

use eventline::{Envelope, EventStream, ProducerId, Timestamp, Version};
use proptest::prelude::*;
use serde_json::json;

const TYPES: [&str; 4] = ["placed", "paid", "shipped", "closed"];

fn events(types: &[usize]) -> Vec<Envelope> {
    types
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Envelope::new(
                TYPES[*t],
                ProducerId::new("order", "1"),
                Version(i as u64 + 1),
                Timestamp(i as i64),
                json!({}),
            )
        })
        .collect()
}

fn arb_events() -> impl Strategy<Value = Vec<Envelope>> {
    prop::collection::vec(0..TYPES.len(), 1..40).prop_map(|types| events(&types))
}

fn arb_events_with_index() -> impl Strategy<Value = (Vec<Envelope>, usize)> {
    arb_events().prop_flat_map(|events| {
        let len = events.len();
        (Just(events), 0..len)
    })
}

proptest! {
    #[test]
    fn from_and_before_split_the_stream((events, i) in arb_events_with_index()) {
        let stream = EventStream::new(events.clone());
        let head: Vec<_> = stream.before(&events[i]).iter().collect();
        let tail: Vec<_> = stream.from(&events[i]).iter().collect();

        prop_assert_eq!(head.len(), i);
        prop_assert_eq!(tail.first(), Some(&events[i]));
        prop_assert_eq!([head, tail].concat(), events);
    }

    #[test]
    fn after_never_yields_the_bound_or_anything_earlier((events, i) in arb_events_with_index()) {
        let stream = EventStream::new(events.clone());
        let resumed: Vec<_> = stream.after(&events[i]).iter().collect();

        prop_assert_eq!(resumed.len(), events.len() - i - 1);
        prop_assert!(resumed.iter().all(|e| e.version > events[i].version));
    }

    #[test]
    fn to_and_after_partition_the_stream((events, i) in arb_events_with_index()) {
        let stream = EventStream::new(events.clone());
        prop_assert_eq!(stream.to(&events[i]).len() + stream.after(&events[i]).len(), events.len());
        prop_assert_eq!(stream.to(&events[i]).last(), Some(events[i].clone()));
    }

    #[test]
    fn only_and_without_partition_by_type(events in arb_events(), picked in prop::sample::subsequence(TYPES.to_vec(), 0..=TYPES.len())) {
        let stream = EventStream::new(events.clone());
        let kept = stream.only(&picked);
        let dropped = stream.without(&picked);

        prop_assert_eq!(kept.len() + dropped.len(), events.len());
        prop_assert!(kept.iter().all(|e| picked.contains(&e.event_type.as_str())));
        prop_assert!(dropped.iter().all(|e| !picked.contains(&e.event_type.as_str())));
    }

    #[test]
    fn limit_caps_iteration(events in arb_events(), n in 0usize..50) {
        let stream = EventStream::new(events.clone());
        prop_assert_eq!(stream.limit(n).len(), n.min(events.len()));
        prop_assert_eq!(stream.limit(n).limit(n + 3).len(), n.min(events.len()));
    }

    #[test]
    fn unknown_bound_yields_nothing(stored in arb_events()) {
        let stranger = events(&[0]).remove(0);
        let stream = EventStream::new(stored.clone());

        prop_assert!(stream.from(&stranger).empty());
        prop_assert!(stream.after(&stranger).empty());
        prop_assert!(stream.to(&stranger).empty());
        prop_assert_eq!(stream.len(), stored.len());
    }
}
