//! File-backed store tests: persistence across reopen, retention, and
//! concurrent writers sharing one store instance or one storage root.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use sms_triage_core::models::{Priority, RecordDraft};
use sms_triage_store::{
    ALLOW_LIST_KEY, AllowList, FileMedium, Medium, RECORDS_KEY, RecordStore, StoreOptions,
};

fn draft(label: &str, title: &str) -> RecordDraft {
    RecordDraft {
        source_label: label.to_string(),
        title: title.to_string(),
        ..RecordDraft::default()
    }
}

fn open_store(medium: &Arc<FileMedium>, max_records: usize) -> RecordStore {
    RecordStore::open(
        Arc::clone(medium) as Arc<dyn Medium>,
        StoreOptions {
            max_records,
            ..StoreOptions::default()
        },
    )
}

#[test]
fn records_survive_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let store = open_store(&medium, 100);
    let urgent = store
        .insert(RecordDraft {
            priority: Priority::Urgent,
            ..draft("Server", "Disk low")
        })
        .unwrap();
    store.insert(draft("SMS", "hello")).unwrap();
    drop(store);

    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let reopened = open_store(&medium, 100);
    let records = reopened.query();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].id, urgent.id);
    assert_eq!(records[1].priority, Priority::Urgent);
}

#[test]
fn retention_cap_holds_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let max = 30;
    let store = open_store(&medium, max);
    let mut ids = Vec::new();
    for i in 0..(max + 50) {
        ids.push(store.insert(draft("SMS", &format!("n{i}"))).unwrap().id);
    }
    drop(store);

    let reopened = open_store(&medium, max);
    let stored: Vec<_> = reopened.query().into_iter().map(|r| r.id).collect();
    let newest: Vec<_> = ids.into_iter().rev().take(max).collect();
    assert_eq!(stored, newest);
}

#[test]
fn records_and_allow_list_are_keyed_independently() {
    let dir = tempfile::tempdir().unwrap();
    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let store = open_store(&medium, 10);
    let allow = AllowList::open(Arc::clone(&medium) as Arc<dyn Medium>);

    store.insert(draft("SMS", "x")).unwrap();
    allow.add_entry("+40712345678").unwrap();
    store.clear_all().unwrap();

    assert!(medium.load(RECORDS_KEY).unwrap().is_none());
    assert!(medium.load(ALLOW_LIST_KEY).unwrap().is_some());
    assert!(!allow.is_allowed("+40700000000"));
}

#[test]
fn corrupt_file_is_read_as_empty_and_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("records.json"), b"not json at all").unwrap();
    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let store = open_store(&medium, 10);
    assert!(store.query().is_empty());

    store.insert(draft("SMS", "fresh")).unwrap();
    let reopened = open_store(&medium, 10);
    assert_eq!(reopened.len(), 1);
}

#[test]
fn concurrent_inserts_do_not_lose_writes() {
    let dir = tempfile::tempdir().unwrap();
    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let store = Arc::new(open_store(&medium, 1000));
    let threads = 8;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let rec = store.insert(draft(&format!("T{t}"), &format!("{i}"))).unwrap();
                    if i % 5 == 0 {
                        store.mark_read(&rec.id).unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked");
    }

    let records = store.query();
    assert_eq!(records.len(), threads * per_thread);
    let unique: HashSet<_> = records.iter().map(|r| r.id.clone()).collect();
    assert_eq!(unique.len(), records.len());
    assert_eq!(store.unread_count(), threads * (per_thread - 5));
    assert!(
        records.windows(2).all(|w| w[0].created_at >= w[1].created_at),
        "storage order must be newest-first"
    );

    let reopened = open_store(&medium, 1000);
    assert_eq!(reopened.query(), records);
}

#[test]
fn stores_on_separate_handles_to_one_root_keep_every_insert() {
    let dir = tempfile::tempdir().unwrap();
    let threads = 4;
    let per_thread = 40;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            // One medium per thread, as two processes would each open the root.
            let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
            let store = open_store(&medium, 1000);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    store.insert(draft(&format!("P{t}"), &format!("{i}"))).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked");
    }

    let medium = Arc::new(FileMedium::open(dir.path()).unwrap());
    let reopened = open_store(&medium, 1000);
    assert_eq!(reopened.len(), threads * per_thread);
    for t in 0..threads {
        assert_eq!(reopened.by_source(&format!("P{t}")).len(), per_thread);
    }
}
