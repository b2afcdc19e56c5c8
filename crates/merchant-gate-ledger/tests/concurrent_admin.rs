use alloy::primitives::Address;
use gate_ledger::{AdminStore, InMemoryAdminStore};
use std::sync::Arc;
use std::thread;

fn address(i: u64) -> Address {
    let mut bytes = [0u8; 20];
    bytes[12..20].copy_from_slice(&i.to_be_bytes());
    Address::new(bytes)
}

#[test]
fn test_hide_unhide_race() {
    let store = Arc::new(InMemoryAdminStore::new());
    let store_clone = store.clone();

    // Thread 1: keep unhiding everything
    let t1 = thread::spawn(move || {
        for _ in 0..100 {
            for i in 0..100u64 {
                store_clone.unhide(address(i)).unwrap();
            }
        }
    });

    // Thread 2: hide and annotate
    let writer = store.clone();
    let t2 = thread::spawn(move || {
        for i in 0..1000u64 {
            writer.hide(address(i)).unwrap();
            writer.set_note(address(i), &format!("customer {i}")).unwrap();
        }
    });

    t1.join().unwrap();
    t2.join().unwrap();

    // Addresses past the unhide range are untouched by thread 1.
    for i in 100..1000u64 {
        assert!(store.is_hidden(address(i)).unwrap());
    }
    assert_eq!(store.notes().unwrap().len(), 1000);
}

#[test]
fn test_sqlite_store_shared_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let store = Arc::new(gate_ledger::SqliteAdminStore::open(path.to_str().unwrap()).unwrap());

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..25u64 {
                    store.hide(address(t * 100 + i)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.hidden().unwrap().len(), 100);
}
