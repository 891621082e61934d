//! Entity store and name index tests.
//!
//! Tests for:
//! - Prefix lookup, ambiguity and deletion
//! - Snapshot listing
//! - Concurrent name reservation

use magikcri::store::{Entity, EntityStore, NameIndex};
use magikcri::Error;
use std::sync::{Arc, Barrier};
use std::thread;

#[derive(Debug, Clone, PartialEq)]
struct Record {
    id: String,
    name: String,
}

impl Record {
    fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl Entity for Record {
    fn id(&self) -> &str {
        &self.id
    }
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_every_unique_prefix_resolves() {
    let store = EntityStore::new();
    store.add(Record::new("abcdef", "one")).unwrap();
    store.add(Record::new("abx123", "two")).unwrap();

    for prefix in ["abc", "abcd", "abcde", "abcdef"] {
        assert_eq!(store.get(prefix).unwrap().id, "abcdef", "prefix {prefix}");
    }
    assert_eq!(store.get("abx").unwrap().name, "two");
}

#[test]
fn test_shared_prefix_is_not_found() {
    let store = EntityStore::new();
    store.add(Record::new("abcdef", "one")).unwrap();
    store.add(Record::new("abx123", "two")).unwrap();

    let err = store.get("ab").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "ambiguous prefix: {err}");
    assert!(store.get("zzz").unwrap_err().is_not_found());
    assert!(store.get("").unwrap_err().is_not_found());
}

#[test]
fn test_duplicate_and_invalid_ids() {
    let store = EntityStore::new();
    store.add(Record::new("abc", "one")).unwrap();

    assert!(matches!(
        store.add(Record::new("abc", "other")),
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        store.add(Record::new("", "empty")),
        Err(Error::InvalidId { .. })
    ));
    assert!(matches!(
        store.add(Record::new("a b", "space")),
        Err(Error::InvalidId { .. })
    ));
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_delete_twice() {
    let store = EntityStore::new();
    store.add(Record::new("abcdef", "one")).unwrap();

    let removed = store.delete("abc").unwrap();
    assert_eq!(removed, Some(Record::new("abcdef", "one")));
    assert_eq!(store.delete("abcdef").unwrap(), None);
    assert!(store.get("abcdef").unwrap_err().is_not_found());
    assert!(store.is_empty().unwrap());
}

#[test]
fn test_deleted_id_frees_prefix() {
    let store = EntityStore::new();
    store.add(Record::new("abcdef", "one")).unwrap();
    store.add(Record::new("abx123", "two")).unwrap();
    store.delete("abx123").unwrap();

    assert_eq!(store.get("ab").unwrap().id, "abcdef");
}

#[test]
fn test_list_is_a_snapshot() {
    let store = EntityStore::new();
    store.add(Record::new("a1", "one")).unwrap();
    store.add(Record::new("b2", "two")).unwrap();

    let snapshot = store.list().unwrap();
    store.delete("a1").unwrap();

    assert_eq!(snapshot.len(), 2);
    assert_eq!(store.list().unwrap().len(), 1);
}

// =============================================================================
// Name Reservation Tests
// =============================================================================

#[test]
fn test_name_reservation_lifecycle() {
    let names = NameIndex::new();
    names.reserve("web", "id-1").unwrap();
    names.reserve("web", "id-1").unwrap();

    let err = names.reserve("web", "id-2").unwrap_err();
    assert!(matches!(err, Error::NameConflict { ref holder, .. } if holder == "id-1"));

    names.release_by_key("id-1").unwrap();
    assert_eq!(names.get("web").unwrap(), None);
    names.reserve("web", "id-2").unwrap();
    names.release_by_name("web").unwrap();
    names.release_by_name("web").unwrap();
    assert_eq!(names.get("web").unwrap(), None);
}

#[test]
fn test_concurrent_adds_with_same_name() {
    const WORKERS: usize = 8;

    let store = Arc::new(EntityStore::new());
    let names = Arc::new(NameIndex::new());
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let store = store.clone();
            let names = names.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let record = Record::new(&format!("id-{i}"), "shared");
                barrier.wait();
                names.reserve(&record.name, &record.id)?;
                store.add(record)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::NameConflict { .. })))
        .count();

    assert_eq!(winners, 1, "exactly one add should win the name");
    assert_eq!(conflicts, WORKERS - 1);
    assert_eq!(store.len().unwrap(), 1);

    let winner = store.list().unwrap().remove(0);
    assert_eq!(names.get("shared").unwrap(), Some(winner.id));
}
