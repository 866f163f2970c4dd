//! Error handling and edge case tests.

use observable_map::{MapError, ObservableMap, SubscriptionFilter, UpdateEvent, ValueKind};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn test_map() -> ObservableMap<String, Value> {
    ObservableMap::type_safe(Some(
        [
            ("name".to_string(), json!("sensor")),
            ("count".to_string(), json!(1)),
        ]
        .into_iter()
        .collect(),
    ))
}

fn count_events(map: &ObservableMap<String, Value>) -> Arc<Mutex<usize>> {
    let count = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&count);
    map.subscribe(move |_| *sink.lock() += 1).unwrap();
    count
}

// --- Type Conflicts ---

#[test]
fn test_initial_entries_are_pinned() {
    let map = test_map();
    let events = count_events(&map);

    let result = map.set("count".to_string(), json!("one"));
    match result {
        Err(MapError::TypeConflict {
            key,
            expected,
            actual,
        }) => {
            assert_eq!(key, "\"count\"");
            assert_eq!(expected, ValueKind::Integer);
            assert_eq!(actual, ValueKind::String);
        }
        other => panic!("Expected TypeConflict, got {:?}", other),
    }

    // State should be unchanged, nothing emitted
    assert_eq!(map.get(&"count".to_string()), Some(json!(1)));
    assert_eq!(*events.lock(), 0);
}

#[test]
fn test_conflict_in_update_all_rejects_everything() {
    let map = test_map();
    let before = map.to_plain_map();

    let result = map.update_all(|key, value| {
        if key == "count" {
            json!(value.as_i64().unwrap_or(0) + 1)
        } else {
            json!(42)
        }
    });

    assert!(matches!(result, Err(MapError::TypeConflict { .. })));
    assert_eq!(map.to_plain_map(), before);
}

#[test]
fn test_null_is_exempt_from_pins() {
    let map = test_map();

    map.set("count".to_string(), Value::Null).unwrap();
    assert_eq!(map.get(&"count".to_string()), Some(Value::Null));
    assert_eq!(map.pinned_type(&"count".to_string()), Some(ValueKind::Integer));

    map.set("fresh".to_string(), Value::Null).unwrap();
    assert_eq!(map.pinned_type(&"fresh".to_string()), None);
    map.set("fresh".to_string(), json!([1, 2])).unwrap();
    assert_eq!(map.pinned_type(&"fresh".to_string()), Some(ValueKind::Array));
}

#[test]
fn test_pin_null_is_unsupported() {
    let map = test_map();
    assert!(matches!(
        map.pin_type("x".to_string(), ValueKind::Null),
        Err(MapError::UnsupportedOperation(_))
    ));
}

#[test]
fn test_repin_to_other_kind_conflicts() {
    let map = test_map();
    assert!(map.pin_type("count".to_string(), ValueKind::Integer).is_ok());
    assert!(matches!(
        map.pin_type("count".to_string(), ValueKind::Float),
        Err(MapError::TypeConflict { .. })
    ));
}

// --- Missing Handlers ---

#[test]
fn test_update_absent_without_handler() {
    let map: ObservableMap<String, i64> = ObservableMap::new();
    let result = map.update("missing".to_string(), |v| v + 1);

    match result {
        Err(MapError::MissingAbsentHandler { key }) => assert_eq!(key, "\"missing\""),
        other => panic!("Expected MissingAbsentHandler, got {:?}", other),
    }
    assert!(map.is_empty());
}

// --- Closed Stream ---

#[test]
fn test_every_write_fails_after_close() {
    let map = test_map();
    let snapshot = map.to_plain_map();
    map.close();

    let key = || "count".to_string();
    let closed = |result: observable_map::Result<()>| matches!(result, Err(MapError::ClosedStream));

    assert!(closed(map.set(key(), json!(2))));
    assert!(closed(map.set_all([(key(), json!(3))])));
    assert!(closed(map.patch(HashMap::new())));
    assert!(closed(map.remove(&key()).map(|_| ())));
    assert!(closed(map.remove_where(|_, _| true)));
    assert!(closed(map.update(key(), |v| v.clone()).map(|_| ())));
    assert!(closed(map.update_all(|_, v| v.clone())));
    assert!(closed(map.clear()));
    assert!(closed(map.revert(key())));
    assert!(closed(map.revert_all()));
    assert!(closed(map.resend(key())));
    assert!(closed(map.resend_all()));
    assert!(closed(map.subscribe(|_| {}).map(|_| ())));
    assert!(closed(map.as_shared_stream().map(|_| ())));
    assert!(closed(
        map.connect_source(key(), crossbeam_channel::never()).map(|_| ())
    ));

    // Reads keep working and state is unchanged
    assert_eq!(map.to_plain_map(), snapshot);
    assert!(!map.unsubscribe(observable_map::SubscriptionId(1)));
}

#[test]
fn test_close_from_callback() {
    let map: ObservableMap<String, i64> = ObservableMap::new();
    let handle = map.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    map.subscribe(move |event: &UpdateEvent<String, i64>| {
        sink.lock().push(event.changed.len());
        if event.touches(&"stop".to_string()) {
            handle.close();
            assert!(matches!(
                handle.set("after".to_string(), 1),
                Err(MapError::ClosedStream)
            ));
        }
    })
    .unwrap();

    map.set("a".to_string(), 1).unwrap();
    map.set("stop".to_string(), 1).unwrap();

    assert!(map.is_closed());
    assert_eq!(*seen.lock(), vec![1, 1]);
    assert_eq!(map.get(&"after".to_string()), None);
}

// --- Edge Cases ---

#[test]
fn test_noop_writes_emit_nothing() {
    let map = test_map();
    let events = count_events(&map);

    map.set("count".to_string(), json!(1)).unwrap();
    map.remove(&"missing".to_string()).unwrap();
    map.patch([("missing".to_string(), None)].into_iter().collect())
        .unwrap();
    map.remove_where(|_, _| false).unwrap();
    map.update_all(|_, v| v.clone()).unwrap();
    map.revert_all().unwrap();

    assert_eq!(*events.lock(), 0);
}

#[test]
fn test_filtered_stream_ignores_other_keys() {
    let map = test_map();
    let stream = map
        .subscribe_stream(SubscriptionFilter::keys(["name".to_string()]))
        .unwrap();

    map.set("count".to_string(), json!(2)).unwrap();
    assert!(stream.try_recv().is_err());
}

#[test]
fn test_non_string_keys_fail_json_encoding() {
    let map: ObservableMap<(i32, i32), i64> = ObservableMap::new();
    let stream = map.as_shared_stream().unwrap();
    map.set((1, 2), 3).unwrap();

    let event = stream.try_recv().unwrap();
    assert!(matches!(event.to_json(), Err(MapError::Serialization(_))));
}
