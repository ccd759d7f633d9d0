//! End-to-end sync scenarios across the store, engine and transports.

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tidesync_engine::{
    create_import_plan, execute_import_plan, read_cursor, HttpTransport, LoopbackClient,
    MemoryRemote, MockTransport, ModelRegistry, SyncDirection, SyncError, SyncScheduler,
};
use tidesync_protocol::{PullPage, SyncRecord};
use tidesync_store::{Query, Record};
use tidesync_testkit::prelude::*;

fn seeded_patient<T: tidesync_engine::SyncTransport>(node: &TestNode<T>) {
    node.store()
        .bulk_create("Patient", vec![Record::new("pa1").with("display_name", "Ana")])
        .unwrap();
}

#[test]
fn parents_are_created_before_children() {
    let registry = survey_registry();
    let graph = registry.graph();

    assert_eq!(graph.creation_order(), ["Program", "Survey"]);
    assert_eq!(graph.deletion_order(), vec!["Survey", "Program"]);
}

#[test]
fn clinic_schema_orders_every_edge() {
    let registry = clinic_registry();
    let graph = registry.graph();

    for name in graph.creation_order() {
        for dependency in graph.dependencies_of(name).unwrap() {
            assert!(
                graph.position(dependency) < graph.position(name),
                "{dependency} must precede {name}"
            );
        }
    }
    assert!(graph.position("Patient") < graph.position("PatientFacility"));
    assert!(graph.position("Encounter") < graph.position("NoteItem"));
    assert!(graph.excluded_edges().is_empty());
}

#[test]
fn reference_channel_pulls_until_an_empty_page() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    node.transport().queue_pull(
        REFERENCE_CHANNEL,
        PullPage::new(vec![reference_record("r1", "Lakeside")], 1, 1234),
    );
    node.transport()
        .queue_pull(REFERENCE_CHANNEL, PullPage::empty(2345));

    let summary = node.pull_and_import("ReferenceData").unwrap();

    assert_eq!(summary.stats.created, 1);
    let row = node.get("ReferenceData", "r1").unwrap();
    assert_eq!(row.get_str("name"), Some("Lakeside"));
    let cursor = read_cursor(node.store(), REFERENCE_CHANNEL).unwrap().unwrap();
    assert_eq!(cursor.last_synced, 1234);
    assert_eq!(node.transport().pull_cursors(REFERENCE_CHANNEL).len(), 2);
}

#[test]
fn local_patient_gets_a_facility_link() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new())
        .with_patient_links();

    node.create("Patient", Record::new("pa1").with("display_name", "Ana"));
    let links = node
        .store()
        .find_all("PatientFacility", &Query::all().where_eq("patient_id", "pa1"))
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].get_str("facility_id"), Some("facility-a"));
    assert_eq!(links[0].get_bool(tidesync_engine::MARKED_FOR_PUSH), Some(true));

    node.store()
        .bulk_create("Patient", vec![Record::new("pa2")])
        .unwrap();
    let links = node
        .store()
        .find_all("PatientFacility", &Query::all().where_eq("patient_id", "pa2"))
        .unwrap();
    assert!(links.is_empty());
}

#[test]
fn parent_and_child_tombstones_in_one_cycle() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    node.store()
        .bulk_create("Program", vec![Record::new("p1")])
        .unwrap();
    node.store()
        .bulk_create("Survey", vec![Record::new("s1").with("program_id", "p1")])
        .unwrap();

    node.transport()
        .queue_pull("Program", PullPage::new(vec![SyncRecord::tombstone("p1")], 1, 10));
    node.transport()
        .queue_pull("Survey", PullPage::new(vec![SyncRecord::tombstone("s1")], 1, 11));

    let report = node.sync();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.deleted, 2);
    assert!(node.get("Survey", "s1").is_none());
    assert!(node.get("Program", "p1").is_none());
}

#[test]
fn pulled_records_are_never_dirty() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    seeded_patient(&node);
    node.transport().queue_pull(
        "Encounter",
        PullPage::new(
            vec![encounter_record(
                "e1",
                "pa1",
                vec![note_value("n1", "fever"), note_value("n2", "rest")],
            )],
            1,
            40,
        ),
    );

    node.sync();

    assert_eq!(node.flag("Encounter", "e1"), Some(false));
    assert_eq!(node.get("Note", "n2").unwrap().get_str("encounter_id"), Some("e1"));
    assert!(node.transport().pushed("Encounter").is_empty());
    assert!(node.transport().pushed("Patient").is_empty());
}

#[test]
fn rejected_push_keeps_the_flag_and_success_clears_it() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    seeded_patient(&node);
    node.create("Encounter", Record::new("e1").with("patient_id", "pa1"));
    node.transport().fail_push("Encounter", "central unavailable", true);

    let report = node.sync();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].direction, SyncDirection::Push);
    assert!(report.failures[0].retryable);
    assert_eq!(node.flag("Encounter", "e1"), Some(true));

    let report = node.sync();
    assert!(report.is_clean());
    assert_eq!(node.flag("Encounter", "e1"), Some(false));
    assert_eq!(node.transport().pushed("Encounter").len(), 2);
}

#[test]
fn nested_edit_pushes_the_whole_aggregate() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    seeded_patient(&node);
    node.transport().queue_pull(
        "Encounter",
        PullPage::new(vec![encounter_record("e1", "pa1", vec![note_value("n1", "fever")])], 1, 5),
    );
    node.sync();

    node.create(
        "NoteItem",
        Record::new("i1").with("note_id", "n1").with("text", "paracetamol"),
    );
    assert_eq!(node.flag("Encounter", "e1"), Some(true));
    node.sync();

    let pushed = node.transport().pushed("Encounter");
    assert_eq!(pushed.len(), 1);
    assert_eq!(
        pushed[0].data["notes"][0]["items"][0]["text"],
        json!("paracetamol")
    );
    assert!(pushed[0].data.get("printed_at").is_none());
    assert_eq!(node.flag("Encounter", "e1"), Some(false));
}

#[test]
fn local_only_fields_stay_local() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    seeded_patient(&node);
    node.create(
        "Encounter",
        Record::new("e1")
            .with("patient_id", "pa1")
            .with("printed_at", "2026-01-01"),
    );
    node.sync();

    let pushed = node.transport().pushed("Encounter");
    assert!(pushed[0].data.get("printed_at").is_none());
    assert_eq!(
        node.get("Encounter", "e1").unwrap().get_str("printed_at"),
        Some("2026-01-01")
    );
}

#[test]
fn cursor_survives_a_restart() {
    let transport = Arc::new(MockTransport::new());
    let node = TestNode::memory("facility-a", clinic_registry(), Arc::clone(&transport));
    transport.queue_pull(
        "Program",
        PullPage::new(vec![SyncRecord::new(json!({ "id": "p1" }))], 1, 99),
    );
    node.create("Patient", Record::new("pa1"));
    transport.fail_push("Patient", "offline", true);
    node.sync();

    let node = node.restart();
    assert!(node.get("Program", "p1").is_some());
    assert_eq!(node.flag("Patient", "pa1"), Some(true));
    assert_eq!(
        read_cursor(node.store(), "Program").unwrap().unwrap().last_synced,
        99
    );

    node.sync();
    let cursors = transport.pull_cursors("Program");
    assert_eq!(cursors.last().unwrap().since, 99);
    assert_eq!(node.flag("Patient", "pa1"), Some(false));
}

#[test]
fn file_node_persists_its_log() {
    let remote = Arc::new(MemoryRemote::new());
    let node = TestNode::file("facility-a", clinic_registry(), Arc::clone(&remote));
    node.create("Patient", Record::new("pa1"));
    node.sync();

    let path = node.path().unwrap();
    assert!(path.exists());
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
    assert!(remote.record("Patient", "pa1").is_some());
}

#[test]
fn two_facilities_converge_through_central() {
    let remote = Arc::new(MemoryRemote::new());
    let a = TestNode::memory("facility-a", clinic_registry(), Arc::clone(&remote))
        .with_patient_links();
    let b = TestNode::memory("facility-b", clinic_registry(), Arc::clone(&remote));

    a.create("Patient", Record::new("pa1").with("display_name", "Ana"));
    a.create("Encounter", Record::new("e1").with("patient_id", "pa1"));
    a.create(
        "Note",
        Record::new("n1").with("encounter_id", "e1").with("content", "fever"),
    );
    assert!(a.sync().is_clean());
    assert!(b.sync().is_clean());

    assert_eq!(b.get("Patient", "pa1").unwrap().get_str("display_name"), Some("Ana"));
    assert_eq!(b.get("Note", "n1").unwrap().get_str("content"), Some("fever"));
    assert_eq!(b.store().count("PatientFacility").unwrap(), 1);
    assert_eq!(b.flag("Encounter", "e1"), Some(false));

    b.update("Note", "n1", patch([("content", "resolved")]));
    assert_eq!(b.flag("Encounter", "e1"), Some(true));
    b.sync();
    a.sync();

    assert_eq!(a.get("Note", "n1").unwrap().get_str("content"), Some("resolved"));
    assert_eq!(a.flag("Encounter", "e1"), Some(false));
}

#[test]
fn central_tombstone_removes_the_aggregate() {
    let remote = Arc::new(MemoryRemote::new());
    let node = TestNode::memory("facility-a", clinic_registry(), Arc::clone(&remote));
    remote
        .seed("Patient", vec![patient_record("pa1", "Ana")])
        .unwrap();
    remote
        .seed(
            "Encounter",
            vec![encounter_record("e1", "pa1", vec![note_value("n1", "fever")])],
        )
        .unwrap();
    node.sync();
    assert!(node.get("Note", "n1").is_some());

    remote
        .seed("Encounter", vec![SyncRecord::tombstone("e1")])
        .unwrap();
    let report = node.sync();

    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.deleted, 2);
    assert!(node.get("Encounter", "e1").is_none());
    assert!(node.get("Note", "n1").is_none());
    assert!(node.get("Patient", "pa1").is_some());
}

#[test]
fn http_loopback_carries_a_full_cycle() {
    let remote = Arc::new(MemoryRemote::with_page_limit(2));
    let http = |remote: &Arc<MemoryRemote>| {
        HttpTransport::new("http://central.local/", LoopbackClient::new(Arc::clone(remote)))
            .with_pull_limit(2)
    };
    let a = TestNode::memory("facility-a", clinic_registry(), http(&remote));
    let b = TestNode::memory("facility-b", clinic_registry(), http(&remote));

    for i in 0..5 {
        a.create("Patient", Record::new(format!("pa{i}")));
    }
    assert!(a.sync().is_clean());

    let summary = b.pull_and_import("Patient").unwrap();
    assert_eq!(summary.stats.created, 5);
    assert_eq!(summary.pages, 3);
    assert_eq!(b.store().count("Patient").unwrap(), 5);
}

#[test]
fn offline_central_is_a_retryable_pull_failure() {
    let remote = Arc::new(MemoryRemote::new());
    let node = TestNode::memory("facility-a", clinic_registry(), Arc::clone(&remote));
    node.create("Patient", Record::new("pa1"));
    remote.set_offline(true);

    let report = node.sync();
    assert!(!report.is_clean());
    assert!(report.failures.iter().all(|f| f.retryable));
    assert!(report
        .failures
        .iter()
        .all(|f| f.direction == SyncDirection::Pull));
    assert_eq!(node.flag("Patient", "pa1"), Some(true));

    remote.set_offline(false);
    assert!(node.sync().is_clean());
    assert_eq!(node.flag("Patient", "pa1"), Some(false));
}

#[test]
fn unknown_model_is_reported() {
    let node = TestNode::memory("facility-a", clinic_registry(), MockTransport::new());
    assert!(matches!(
        node.pull_and_import("Appointment"),
        Err(SyncError::UnknownModel(_))
    ));
}

#[tokio::test]
async fn scheduler_pushes_in_the_background() {
    let remote = Arc::new(MemoryRemote::new());
    let node = TestNode::memory("facility-a", clinic_registry(), Arc::clone(&remote));
    node.create("Patient", Record::new("pa1"));

    let scheduler =
        SyncScheduler::start(Arc::clone(&node.manager), Some(Duration::from_millis(10)));
    for _ in 0..200 {
        if remote.record("Patient", "pa1").is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    scheduler.shutdown().await;

    assert!(remote.record("Patient", "pa1").is_some());
    assert!(scheduler.cycles_run() >= 1);
}

fn import_page(registry: &ModelRegistry, store: &tidesync_store::Store, page: &[SyncRecord]) {
    let plan = create_import_plan(registry, "Encounter").unwrap();
    store
        .transaction(|txn| {
            for record in page {
                execute_import_plan(txn, registry, &plan, record)?;
            }
            Ok::<_, SyncError>(())
        })
        .unwrap();
}

fn snapshot(store: &tidesync_store::Store) -> Vec<Record> {
    ["Encounter", "Note"]
        .into_iter()
        .flat_map(|table| store.find_all(table, &Query::all()).unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn creation_order_respects_every_edge(schema in dag_schema_strategy(8)) {
        let registry = ModelRegistry::from_definitions(schema.clone()).unwrap();
        let graph = registry.graph();
        prop_assert_eq!(graph.len(), schema.len());

        for definition in &schema {
            for edge in &definition.belongs_to {
                prop_assert!(graph.position(&edge.target) < graph.position(&definition.name));
            }
        }
        let mut reversed = graph.creation_order().to_vec();
        reversed.reverse();
        prop_assert_eq!(graph.deletion_order(), reversed);
    }

    #[test]
    fn importing_a_page_twice_equals_once(page in encounter_page_strategy("pa1")) {
        let once = TestNode::memory("a", clinic_registry(), MockTransport::new());
        let twice = TestNode::memory("b", clinic_registry(), MockTransport::new());
        seeded_patient(&once);
        seeded_patient(&twice);

        import_page(once.registry(), once.store(), &page);
        import_page(twice.registry(), twice.store(), &page);
        import_page(twice.registry(), twice.store(), &page);

        prop_assert_eq!(snapshot(once.store()), snapshot(twice.store()));
        for record in &page {
            prop_assert_eq!(once.flag("Encounter", record.id().unwrap()), Some(false));
        }
    }

    #[test]
    fn reference_cursor_tracks_the_last_page(
        pages in prop::collection::vec((reference_page_strategy(), 1u64..1000), 1..6)
    ) {
        let node = TestNode::memory("a", clinic_registry(), MockTransport::new());
        let mut expected = 0;
        for (records, requested_at) in &pages {
            node.transport().queue_pull(
                REFERENCE_CHANNEL,
                PullPage::new(records.clone(), records.len() as u64, *requested_at),
            );
            node.transport().queue_pull(REFERENCE_CHANNEL, PullPage::empty(requested_at + 1));
            node.pull_and_import("ReferenceData").unwrap();

            expected = expected.max(*requested_at);
            let cursor = read_cursor(node.store(), REFERENCE_CHANNEL).unwrap().unwrap();
            prop_assert_eq!(cursor.last_synced, expected);
        }
    }
}
