//! Tests for BatchResultSlot

use std::sync::Arc;

use procbatch_core::BatchError;

use crate::slot::BatchResultSlot;

#[test]
fn test_set_and_get() {
    let slot = BatchResultSlot::new();
    slot.set(3, 42i64).unwrap();

    assert_eq!(slot.get(3), Some(42));
    assert_eq!(slot.get(0), None);
    assert!(slot.contains(3));
    assert_eq!(slot.len(), 1);
}

#[test]
fn test_each_ordinal_is_written_once() {
    let slot = BatchResultSlot::new();
    slot.set(1, "first".to_string()).unwrap();

    let err = slot.set(1, "second".to_string()).unwrap_err();
    assert!(matches!(err, BatchError::SlotAlreadySet { ordinal: 1 }));
    assert_eq!(slot.get(1).as_deref(), Some("first"));
}

#[test]
fn test_ordinals_are_sparse_and_sorted() {
    let slot = BatchResultSlot::new();
    slot.set(7, ()).unwrap();
    slot.set(2, ()).unwrap();
    slot.set(5, ()).unwrap();

    assert_eq!(slot.ordinals(), vec![2, 5, 7]);
}

#[test]
fn test_take_removes_the_value() {
    let slot = BatchResultSlot::new();
    slot.set(0, vec![1u8, 2]).unwrap();

    assert_eq!(slot.take(0), Some(vec![1, 2]));
    assert!(slot.is_empty());
    assert_eq!(slot.take(0), None);
}

#[test]
fn test_concurrent_writers_on_distinct_ordinals() {
    let slot = Arc::new(BatchResultSlot::new());
    let handles: Vec<_> = (0..8)
        .map(|ordinal| {
            let slot = slot.clone();
            std::thread::spawn(move || slot.set(ordinal, ordinal * 10).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(slot.len(), 8);
    assert_eq!(slot.get(6), Some(60));
}
