//! Ingest → store → query, through a real file-backed engine.

use sms_triage_core::config::TriageConfig;
use sms_triage_core::models::Priority;
use sms_triage_engine::{DropReason, Engine, Outcome, ReadFilter, TriageView, group_by_source};

fn config(dir: &tempfile::TempDir) -> TriageConfig {
    TriageConfig {
        storage_root: dir.path().to_path_buf(),
        ..TriageConfig::default()
    }
}

#[test]
fn urgent_structured_message_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(&config(&dir)).unwrap();

    let outcome = engine
        .pipeline
        .ingest("[APP:Server] URGENT: Disk low | 5GB left", "SMS", "+40712345678")
        .unwrap();

    let record = outcome.record().cloned().expect("stored record");
    assert_eq!(record.priority, Priority::Urgent);
    assert_eq!(record.title, "Disk low");
    assert_eq!(record.body, "5GB left");
    assert_eq!(record.source_label, "Server");
    assert_eq!(engine.store.query(), vec![record]);
}

#[test]
fn disallowed_origin_is_dropped_and_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(&config(&dir)).unwrap();
    engine.allow_list.add_entry("+40700000000").unwrap();
    let before = engine.store.query();

    let outcome = engine
        .pipeline
        .ingest("[APP:Server] URGENT: Disk low | 5GB left", "SMS", "+40712345678")
        .unwrap();

    assert_eq!(outcome, Outcome::Dropped(DropReason::OriginNotAllowed));
    assert_eq!(DropReason::OriginNotAllowed.to_string(), "origin not allowed");
    assert_eq!(engine.store.query(), before);
    assert!(!dir.path().join("records.json").exists());
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    {
        let engine = Engine::open(&config).unwrap();
        engine.allow_list.add_entry("+1 (234) 567-8900").unwrap();
        engine.pipeline.ingest("[APP:Bank] HIGH: Card used", "SMS", "12345678900").unwrap();
        engine.pipeline.ingest("hello\nworld", "SMS", "+12345678900").unwrap();
    }

    let engine = Engine::open(&config).unwrap();
    assert_eq!(engine.allow_list.entries(), vec!["+12345678900".to_string()]);
    let records = engine.store.query();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].title, "hello");
    assert_eq!(records[0].body, "world");
    assert_eq!(records[1].source_label, "Bank");
}

#[test]
fn triage_flow_over_a_mixed_inbox() {
    let engine = Engine::in_memory(&TriageConfig::default());
    let inputs = [
        "[APP:Bank] HIGH: Card used | 12.00 EUR",
        "[APP:Bank] LOW: Statement ready",
        "Lunch? | maybe",
        "[APP:Server] URGENT: Disk low",
    ];
    for raw in inputs {
        assert!(engine.pipeline.ingest(raw, "SMS", "+40712345678").unwrap().is_stored());
    }

    let newest = engine.store.query()[0].id.clone();
    assert!(engine.store.mark_read(&newest).unwrap());

    let unread = TriageView {
        read: ReadFilter::UnreadOnly,
        ..TriageView::default()
    }
    .apply(&engine.store.query());
    assert_eq!(unread.len(), 3);

    let groups = group_by_source(&engine.store.query());
    assert_eq!(groups[0].source_label, "Bank");
    assert_eq!((groups[0].total, groups[0].unread), (2, 2));

    assert_eq!(engine.store.mark_all_read().unwrap(), 3);
    let once = engine.store.query();
    assert_eq!(engine.store.mark_all_read().unwrap(), 0);
    assert_eq!(engine.store.query(), once);
}

#[test]
fn two_engines_on_one_root_keep_every_message() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let engines = [Engine::open(&config).unwrap(), Engine::open(&config).unwrap()];

    std::thread::scope(|scope| {
        for (n, engine) in engines.iter().enumerate() {
            scope.spawn(move || {
                for i in 0..100 {
                    let text = format!("[APP:E{n}] msg {i}");
                    engine.pipeline.ingest(&text, "SMS", "+40712345678").unwrap();
                }
            });
        }
    });

    let reopened = Engine::open(&config).unwrap();
    assert_eq!(reopened.store.len(), 200);
    let groups = reopened.store.aggregate_by_source();
    assert_eq!(groups["E0"].total, 100);
    assert_eq!(groups["E1"].total, 100);
}

#[test]
fn allow_list_change_from_another_engine_gates_the_next_message() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let server = Engine::open(&config).unwrap();
    let admin = Engine::open(&config).unwrap();

    assert!(server.pipeline.ingest("before", "SMS", "+40712345678").unwrap().is_stored());
    admin.allow_list.add_entry("+40700000000").unwrap();

    let outcome = server.pipeline.ingest("hi", "SMS", "+40712345678").unwrap();
    assert_eq!(outcome, Outcome::Dropped(DropReason::OriginNotAllowed));
    assert!(server.pipeline.ingest("hi", "SMS", "+40700000000").unwrap().is_stored());
}
