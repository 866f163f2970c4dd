//! Property tests: the map behaves like a plain HashMap and never reports
//! unchanged entries.

use observable_map::{ObservableMap, SubscriptionFilter, UpdateEvent};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
enum Op {
    Set(u8, i32),
    Remove(u8),
    Revert(u8),
    RevertAll,
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..6, -3i32..3).prop_map(|(k, v)| Op::Set(k, v)),
        2 => (0u8..6).prop_map(Op::Remove),
        1 => (0u8..6).prop_map(Op::Revert),
        1 => Just(Op::RevertAll),
        1 => Just(Op::Clear),
    ]
}

fn initial_strategy() -> impl Strategy<Value = HashMap<u8, i32>> {
    prop::collection::hash_map(0u8..6, -3i32..3, 0..4)
}

fn replay(model: &mut HashMap<u8, i32>, baseline: &HashMap<u8, i32>, op: &Op) {
    match op {
        Op::Set(k, v) => {
            model.insert(*k, *v);
        }
        Op::Remove(k) => {
            model.remove(k);
        }
        Op::Revert(k) => match baseline.get(k) {
            Some(v) => {
                model.insert(*k, *v);
            }
            None => {
                model.remove(k);
            }
        },
        Op::RevertAll => *model = baseline.clone(),
        Op::Clear => model.clear(),
    }
}

fn apply(map: &ObservableMap<u8, i32>, op: &Op) {
    match op {
        Op::Set(k, v) => map.set(*k, *v).unwrap(),
        Op::Remove(k) => {
            map.remove(k).unwrap();
        }
        Op::Revert(k) => map.revert(*k).unwrap(),
        Op::RevertAll => map.revert_all().unwrap(),
        Op::Clear => map.clear().unwrap(),
    }
}

proptest! {
    #[test]
    fn prop_matches_plain_map(initial in initial_strategy(), ops in prop::collection::vec(op_strategy(), 0..40)) {
        let map = ObservableMap::from_map(initial.clone());
        let mut model = initial.clone();

        for op in &ops {
            apply(&map, op);
            replay(&mut model, &initial, op);
            prop_assert_eq!(map.to_plain_map(), model.clone());
        }
    }

    #[test]
    fn prop_events_only_report_real_changes(initial in initial_strategy(), ops in prop::collection::vec(op_strategy(), 0..40)) {
        let map = ObservableMap::from_map(initial);
        let events: Arc<Mutex<Vec<UpdateEvent<u8, i32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        map.subscribe(move |event| sink.lock().push(event.clone())).unwrap();

        for op in &ops {
            apply(&map, op);
        }

        let events = events.lock();
        for event in events.iter() {
            prop_assert!(!event.is_resend_all());
            for (key, value) in event.changed.iter() {
                prop_assert_ne!(event.before.get(key), value.as_ref());
                prop_assert_eq!(event.after.get(key), value.as_ref());
            }
        }
        for pair in events.windows(2) {
            prop_assert_eq!(&pair[0].after, &pair[1].before);
        }
    }

    #[test]
    fn prop_key_filter_never_leaks(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let map: ObservableMap<u8, i32> = ObservableMap::new();
        let events: Arc<Mutex<Vec<UpdateEvent<u8, i32>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        map.subscribe_with(SubscriptionFilter::keys([0u8]), move |event| {
            sink.lock().push(event.clone())
        })
        .unwrap();

        for op in &ops {
            apply(&map, op);
        }
        map.resend_all().unwrap();

        let events = events.lock();
        prop_assert!(events.last().map(|e| e.is_resend_all()).unwrap_or(false));
        for event in events.iter() {
            prop_assert!(event.is_resend_all() || event.touches(&0));
        }
    }
}
