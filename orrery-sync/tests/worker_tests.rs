use orrery_cache::{Cache, CacheKey};
use orrery_sync::mock::MockSource;
use orrery_sync::{
    MutationRequest, SyncConfig, SyncEngine, SyncNotification, SyncWorker,
};
use orrery_types::{Collection, EntityId, GenericRecord, ModifyTime, ObjectRecord, Record, SchemaId};
use tokio::sync::mpsc::UnboundedReceiver;

fn fresh_cache(dir: &std::path::Path) -> Cache {
    Cache::fresh(dir, CacheKey::new("example.com", "gamma", "alice"))
}

fn design(id: u32, name: &str) -> GenericRecord {
    GenericRecord {
        id: EntityId::new(id),
        schema: SchemaId::new(0),
        name: name.to_string(),
        modify_time: ModifyTime::new(1),
        fields: serde_json::Value::Null,
    }
}

fn root_object() -> ObjectRecord {
    ObjectRecord {
        id: EntityId::ROOT,
        schema: SchemaId::new(3),
        name: "universe".into(),
        modify_time: ModifyTime::new(1),
        parent: EntityId::ROOT,
        contains: Vec::new(),
        order_count: 0,
        fields: serde_json::Value::Null,
    }
}

fn spawn_worker(
    cache: Cache,
    source: MockSource,
) -> (
    orrery_sync::WorkerHandle,
    UnboundedReceiver<SyncNotification>,
    tokio::task::JoinHandle<Cache>,
) {
    let (worker, handle, events) = SyncWorker::new(
        cache,
        Box::new(source),
        SyncEngine::new(SyncConfig::default()),
    );
    let join = tokio::spawn(worker.run());
    (handle, events, join)
}

fn drain(events: &mut UnboundedReceiver<SyncNotification>) -> Vec<SyncNotification> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

// ── Command FIFO ─────────────────────────────────────────────────

#[tokio::test]
async fn commands_resolve_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new();
    source.put_entity(Collection::Objects, Record::Object(root_object()));

    let (handle, mut events, join) = spawn_worker(fresh_cache(dir.path()), source);

    handle.refresh().await.unwrap();
    handle
        .mutate(MutationRequest::create(
            Collection::Designs,
            EntityId::ROOT,
            Record::Generic(design(0, "first")),
        ))
        .await
        .unwrap();
    handle
        .mutate(MutationRequest::create(
            Collection::Designs,
            EntityId::ROOT,
            Record::Generic(design(0, "second")),
        ))
        .await
        .unwrap();
    handle.shutdown().await.unwrap();

    let cache = join.await.unwrap();
    let notifications = drain(&mut events);

    // The refresh resolves before either mutation, and the mutations
    // resolve in the order they were enqueued.
    let mut meaningful = notifications.iter().filter_map(|n| match n {
        SyncNotification::RefreshFinished(_) => Some("refresh".to_string()),
        SyncNotification::Updated(evt) => match evt.change.value() {
            Some(Record::Generic(g)) => Some(g.name.clone()),
            _ => None,
        },
        _ => None,
    });
    assert_eq!(meaningful.next().as_deref(), Some("refresh"));
    assert_eq!(meaningful.next().as_deref(), Some("first"));
    assert_eq!(meaningful.next().as_deref(), Some("second"));

    // Both mutations landed in the returned cache.
    assert_eq!(cache.designs.len(), 2);
}

#[tokio::test]
async fn refresh_posts_progress_and_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new();
    source.put_entity(Collection::Objects, Record::Object(root_object()));

    let (handle, mut events, join) = spawn_worker(fresh_cache(dir.path()), source);
    handle.refresh().await.unwrap();
    handle.shutdown().await.unwrap();
    join.await.unwrap();

    let notifications = drain(&mut events);
    assert!(notifications
        .iter()
        .any(|n| matches!(n, SyncNotification::Progress(_))));
    assert!(notifications
        .iter()
        .any(|n| matches!(n, SyncNotification::RefreshFinished(_))));
}

#[tokio::test]
async fn rejected_mutation_posts_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, mut events, join) = spawn_worker(fresh_cache(dir.path()), MockSource::new());

    handle
        .mutate(MutationRequest::create(
            Collection::Objects,
            EntityId::ROOT,
            Record::Generic(design(1, "nope")),
        ))
        .await
        .unwrap();
    handle.shutdown().await.unwrap();
    let cache = join.await.unwrap();

    let notifications = drain(&mut events);
    assert!(notifications
        .iter()
        .any(|n| matches!(n, SyncNotification::Failed { context, .. } if context.as_str() == "mutate")));
    assert!(cache.designs.is_empty());
}

#[tokio::test]
async fn unconfirmed_mutation_posts_failure_and_stays_pending() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockSource::new();
    source.fail_mutations(true);

    let (handle, mut events, join) = spawn_worker(fresh_cache(dir.path()), source);
    handle
        .mutate(MutationRequest::create(
            Collection::Orders,
            EntityId::new(5),
            Record::Order(orrery_types::OrderRecord {
                schema: SchemaId::new(11),
                fields: serde_json::Value::Null,
            }),
        ))
        .await
        .unwrap();
    handle.shutdown().await.unwrap();
    let cache = join.await.unwrap();

    let notifications = drain(&mut events);
    assert!(notifications
        .iter()
        .any(|n| matches!(n, SyncNotification::Failed { .. })));
    // The optimistic creating node is still there, awaiting a retry
    // or rollback decision.
    assert_eq!(cache.orders[&EntityId::new(5)].len(), 1);
}

#[tokio::test]
async fn worker_stops_when_all_handles_drop() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, _events, join) = spawn_worker(fresh_cache(dir.path()), MockSource::new());
    drop(handle);

    let cache = join.await.unwrap();
    assert!(cache.objects.is_empty());
}

#[tokio::test]
async fn save_command_writes_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let cache = fresh_cache(dir.path());
    let path = cache.path().to_path_buf();
    let source = MockSource::new();
    source.put_entity(Collection::Objects, Record::Object(root_object()));

    let (handle, _events, join) = spawn_worker(cache, source);
    handle.refresh().await.unwrap();
    handle.save().await.unwrap();
    handle.shutdown().await.unwrap();
    join.await.unwrap();

    assert!(path.exists());
}
