use orrery_cache::{Cache, CacheKey};
use orrery_sync::mock::MockSource;
use orrery_sync::{
    NullProgress, ProgressState, SyncConfig, SyncEngine, SyncError,
};
use orrery_types::{
    BoardRecord, Collection, DescriptorField, DescriptorRecord, EntityId, FieldKind,
    GenericRecord, MessageRecord, ModifyTime, ObjectRecord, OrderRecord, Record, SchemaId,
};

fn fresh_cache(dir: &std::path::Path) -> Cache {
    Cache::fresh(dir, CacheKey::new("example.com", "gamma", "alice"))
}

fn engine() -> SyncEngine {
    SyncEngine::new(SyncConfig::default())
}

fn object(id: u32, time: i64, contains: &[u32], order_count: u32) -> ObjectRecord {
    ObjectRecord {
        id: EntityId::new(id),
        schema: SchemaId::new(3),
        name: format!("object-{id}"),
        modify_time: ModifyTime::new(time),
        parent: EntityId::ROOT,
        contains: contains.iter().copied().map(EntityId::new).collect(),
        order_count,
        fields: serde_json::Value::Null,
    }
}

fn board(id: u32, time: i64, message_count: u32) -> BoardRecord {
    BoardRecord {
        id: EntityId::new(id),
        schema: SchemaId::new(1),
        name: format!("board-{id}"),
        modify_time: ModifyTime::new(time),
        message_count,
        fields: serde_json::Value::Null,
    }
}

fn generic(id: u32, time: i64) -> GenericRecord {
    GenericRecord {
        id: EntityId::new(id),
        schema: SchemaId::new(0),
        name: format!("entity-{id}"),
        modify_time: ModifyTime::new(time),
        fields: serde_json::Value::Null,
    }
}

fn order(target: u32) -> OrderRecord {
    OrderRecord {
        schema: SchemaId::new(11),
        fields: serde_json::json!({"target": target}),
    }
}

fn message(subject: &str) -> MessageRecord {
    MessageRecord {
        schema: SchemaId::new(0),
        subject: subject.to_string(),
        body: String::new(),
        fields: serde_json::Value::Null,
    }
}

fn descriptor(schema: u32, time: i64) -> DescriptorRecord {
    DescriptorRecord {
        schema: SchemaId::new(schema),
        name: format!("type-{schema}"),
        description: String::new(),
        fields: vec![DescriptorField::new("target", FieldKind::EntityRef)],
        modify_time: ModifyTime::new(time),
    }
}

/// A server with a root object and nothing else.
fn bare_source() -> MockSource {
    let source = MockSource::new();
    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[], 0)));
    source
}

async fn run(engine: &SyncEngine, cache: &mut Cache, source: &MockSource) -> orrery_sync::SyncReport {
    engine
        .refresh(cache, source, &mut NullProgress)
        .await
        .unwrap()
}

// ── Full refresh ─────────────────────────────────────────────────

#[tokio::test]
async fn fresh_sync_populates_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();

    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[5], 0)));
    source.put_entity(Collection::Objects, Record::Object(object(5, 100, &[], 2)));
    source.set_children(
        Collection::Orders,
        EntityId::new(5),
        vec![Record::Order(order(1)), Record::Order(order(2))],
    );
    source.put_entity(Collection::Boards, Record::Board(board(2, 40, 1)));
    source.set_children(
        Collection::Messages,
        EntityId::new(2),
        vec![Record::Message(message("welcome"))],
    );
    source.put_entity(Collection::OrderTypes, Record::Descriptor(descriptor(11, 5)));
    source.put_entity(Collection::Designs, Record::Generic(generic(9, 7)));
    source.put_entity(Collection::Players, Record::Generic(generic(1, 2)));

    let report = run(&engine(), &mut cache, &source).await;

    assert_eq!(cache.objects.len(), 2);
    assert_eq!(cache.objects.timestamp_of(EntityId::new(5)), Some(ModifyTime::new(100)));
    // Back-reference set by the tree rebuild.
    assert_eq!(cache.objects.get(EntityId::new(5)).unwrap().parent, EntityId::ROOT);

    let orders: Vec<OrderRecord> = cache.orders[&EntityId::new(5)]
        .confirmed_values()
        .cloned()
        .collect();
    assert_eq!(orders, vec![order(1), order(2)]);
    // The root has no orders; it still gets an (empty) list.
    assert!(cache.orders[&EntityId::ROOT].is_empty());

    assert_eq!(cache.boards.len(), 1);
    assert_eq!(cache.messages[&EntityId::new(2)].len(), 1);
    assert!(cache.order_types.contains(SchemaId::new(11)));
    assert_eq!(cache.designs.len(), 1);
    assert_eq!(cache.players.len(), 1);

    assert!(report.failures.is_empty());
    assert!(report.fetched >= 6);
}

#[tokio::test]
async fn unchanged_new_and_deleted_objects() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();

    // First sync: server has root -> {5, 9}.
    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[5, 9], 0)));
    source.put_entity(Collection::Objects, Record::Object(object(5, 100, &[], 1)));
    source.put_entity(Collection::Objects, Record::Object(object(9, 10, &[], 1)));
    source.set_children(Collection::Orders, EntityId::new(5), vec![Record::Order(order(1))]);
    source.set_children(Collection::Orders, EntityId::new(9), vec![Record::Order(order(2))]);
    run(&engine(), &mut cache, &source).await;
    assert!(cache.objects.contains(EntityId::new(9)));
    assert!(cache.orders.contains_key(&EntityId::new(9)));

    // Second sync: 5 unchanged at t=100, 7 appears at t=50, 9 is gone.
    source.put_entity(Collection::Objects, Record::Object(object(0, 2, &[5, 7], 0)));
    source.put_entity(Collection::Objects, Record::Object(object(7, 50, &[], 0)));
    source.drop_entity(Collection::Objects, EntityId::new(9));

    let fetched_before = source.fetched_ids();
    run(&engine(), &mut cache, &source).await;
    let fetched: Vec<(Collection, EntityId)> = source.fetched_ids()[fetched_before.len()..].to_vec();

    // 5 was current and is untouched by the second round.
    assert!(!fetched.contains(&(Collection::Objects, EntityId::new(5))));
    assert_eq!(cache.objects.timestamp_of(EntityId::new(5)), Some(ModifyTime::new(100)));

    // 7 was fetched and stored at the server's time.
    assert_eq!(cache.objects.timestamp_of(EntityId::new(7)), Some(ModifyTime::new(50)));

    // 9 disappeared along with its orders.
    assert!(!cache.objects.contains(EntityId::new(9)));
    assert!(!cache.orders.contains_key(&EntityId::new(9)));
}

#[tokio::test]
async fn second_sync_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();

    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[5], 0)));
    source.put_entity(Collection::Objects, Record::Object(object(5, 100, &[], 1)));
    source.set_children(Collection::Orders, EntityId::new(5), vec![Record::Order(order(1))]);
    source.put_entity(Collection::Designs, Record::Generic(generic(9, 7)));

    run(&engine(), &mut cache, &source).await;
    let calls_after_first = source.fetch_calls();

    let report = run(&engine(), &mut cache, &source).await;

    assert_eq!(report.fetched, 0);
    assert_eq!(report.removed, 0);
    // An unchanged remote costs zero fetches.
    assert_eq!(source.fetch_calls(), calls_after_first);
    assert_eq!(cache.objects.timestamp_of(EntityId::new(5)), Some(ModifyTime::new(100)));
}

// ── Failure policy ───────────────────────────────────────────────

#[tokio::test]
async fn per_item_failure_is_absorbed_and_drops_local_copy() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = bare_source();

    // An orphan object the tree never references.
    source.put_entity(Collection::Objects, Record::Object(object(7, 10, &[], 0)));
    run(&engine(), &mut cache, &source).await;
    assert!(cache.objects.contains(EntityId::new(7)));

    // Next round its fetch fails.
    source.put_entity(Collection::Objects, Record::Object(object(7, 20, &[], 0)));
    source.fail_fetch_of(Collection::Objects, EntityId::new(7));

    let report = run(&engine(), &mut cache, &source).await;

    assert!(!cache.objects.contains(EntityId::new(7)));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].id, EntityId::new(7));
}

#[tokio::test]
async fn missing_containment_reference_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();
    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[5], 0)));
    // Object 5 is declared but never enumerated.

    let err = engine()
        .refresh(&mut cache, &source, &mut NullProgress)
        .await
        .unwrap_err();
    match err {
        SyncError::MissingReference { parent, child } => {
            assert_eq!(parent, EntityId::ROOT);
            assert_eq!(child, EntityId::new(5));
        }
        other => panic!("expected MissingReference, got {other}"),
    }
}

#[tokio::test]
async fn wrong_record_variant_is_structural() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();
    // A generic record where an object is expected.
    source.put_entity(Collection::Objects, Record::Generic(generic(0, 1)));

    let err = engine()
        .refresh(&mut cache, &source, &mut NullProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::WrongRecord(_)), "{err}");
}

// ── Sub-collections ──────────────────────────────────────────────

#[tokio::test]
async fn pipelined_responses_match_parents_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();

    source.put_entity(
        Collection::Objects,
        Record::Object(object(0, 1, &[1, 2, 3], 0)),
    );
    for id in 1u32..=3 {
        source.put_entity(Collection::Objects, Record::Object(object(id, 10, &[], 1)));
        source.set_children(
            Collection::Orders,
            EntityId::new(id),
            vec![Record::Order(order(id * 100))],
        );
    }

    run(&engine(), &mut cache, &source).await;

    for id in 1u32..=3 {
        let orders: Vec<OrderRecord> = cache.orders[&EntityId::new(id)]
            .confirmed_values()
            .cloned()
            .collect();
        assert_eq!(orders, vec![order(id * 100)], "orders of {id}");
    }
    // Pipelined mode was switched back off.
    assert!(!source.is_pipelined());
}

#[tokio::test]
async fn zero_count_parents_get_empty_lists_without_requests() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = bare_source();

    run(&engine(), &mut cache, &source).await;

    assert!(cache.orders[&EntityId::ROOT].is_empty());
}

#[tokio::test]
async fn failed_child_fetch_stores_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();

    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[5], 0)));
    source.put_entity(Collection::Objects, Record::Object(object(5, 10, &[], 3)));
    source.fail_children_of(Collection::Orders, EntityId::new(5));

    let report = run(&engine(), &mut cache, &source).await;

    assert!(cache.orders[&EntityId::new(5)].is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].group, Collection::Orders);
    assert!(!source.is_pipelined());
}

#[tokio::test]
async fn sub_items_arrive_already_idle() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = MockSource::new();

    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[], 2)));
    source.set_children(
        Collection::Orders,
        EntityId::ROOT,
        vec![Record::Order(order(1)), Record::Order(order(2))],
    );

    run(&engine(), &mut cache, &source).await;

    let list = &cache.orders[&EntityId::ROOT];
    for (handle, _) in list.iter() {
        assert_eq!(
            list.current_state(handle).unwrap(),
            orrery_cache::PendingState::Idle
        );
        assert!(list.slot(handle).unwrap().is_some());
    }
}

// ── Descriptors and simple kinds ─────────────────────────────────

#[tokio::test]
async fn descriptors_register_and_prune() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = bare_source();
    source.put_entity(Collection::OrderTypes, Record::Descriptor(descriptor(11, 5)));
    source.put_entity(Collection::OrderTypes, Record::Descriptor(descriptor(12, 6)));
    source.put_entity(Collection::MessageTypes, Record::Descriptor(descriptor(1, 2)));

    run(&engine(), &mut cache, &source).await;
    assert_eq!(cache.order_types.ids(), vec![SchemaId::new(11), SchemaId::new(12)]);
    assert!(cache.message_types.contains(SchemaId::new(1)));

    // One order type disappears from the server.
    source.drop_entity(Collection::OrderTypes, EntityId::new(12));
    run(&engine(), &mut cache, &source).await;
    assert_eq!(cache.order_types.ids(), vec![SchemaId::new(11)]);
}

#[tokio::test]
async fn deleted_simple_entities_are_swept() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = bare_source();
    source.put_entity(Collection::Designs, Record::Generic(generic(9, 7)));

    run(&engine(), &mut cache, &source).await;
    assert!(cache.designs.contains(EntityId::new(9)));

    source.drop_entity(Collection::Designs, EntityId::new(9));
    let report = run(&engine(), &mut cache, &source).await;

    assert!(!cache.designs.contains(EntityId::new(9)));
    assert_eq!(report.removed, 1);
}

#[tokio::test]
async fn boards_and_messages_follow_the_same_flow() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = bare_source();

    source.put_entity(Collection::Boards, Record::Board(board(2, 40, 2)));
    source.set_children(
        Collection::Messages,
        EntityId::new(2),
        vec![
            Record::Message(message("first")),
            Record::Message(message("second")),
        ],
    );
    run(&engine(), &mut cache, &source).await;

    let subjects: Vec<String> = cache.messages[&EntityId::new(2)]
        .confirmed_values()
        .map(|m| m.subject.clone())
        .collect();
    assert_eq!(subjects, vec!["first", "second"]);

    // The board disappears; its messages go with it.
    source.drop_entity(Collection::Boards, EntityId::new(2));
    run(&engine(), &mut cache, &source).await;
    assert!(!cache.boards.contains(EntityId::new(2)));
    assert!(!cache.messages.contains_key(&EntityId::new(2)));
}

// ── Progress callbacks ───────────────────────────────────────────

#[tokio::test]
async fn progress_narrates_the_object_group() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = fresh_cache(dir.path());
    let source = bare_source();
    source.put_entity(Collection::Objects, Record::Object(object(5, 10, &[], 0)));
    source.put_entity(Collection::Objects, Record::Object(object(0, 1, &[5], 0)));

    let mut events = Vec::new();
    let mut sink = |event: orrery_sync::ProgressEvent| events.push(event);
    engine()
        .refresh(&mut cache, &source, &mut sink)
        .await
        .unwrap();

    let objects: Vec<&orrery_sync::ProgressEvent> = events
        .iter()
        .filter(|e| e.group == Collection::Objects)
        .collect();
    assert!(matches!(objects.first().unwrap().state, ProgressState::Start));
    assert!(objects
        .iter()
        .any(|e| matches!(e.state, ProgressState::ToDownload { todownload: 2 })));
    assert_eq!(
        objects
            .iter()
            .filter(|e| matches!(e.state, ProgressState::Downloaded { .. }))
            .count(),
        2
    );
    assert!(matches!(objects.last().unwrap().state, ProgressState::Finished));
}
