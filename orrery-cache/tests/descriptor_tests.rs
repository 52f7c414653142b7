use orrery_cache::{CacheError, DescriptorRegistry};
use orrery_types::{DescriptorField, DescriptorRecord, FieldKind, ModifyTime, SchemaId};

fn descriptor(schema: u32, time: i64, fields: Vec<DescriptorField>) -> DescriptorRecord {
    DescriptorRecord {
        schema: SchemaId::new(schema),
        name: format!("type-{schema}"),
        description: String::new(),
        fields,
        modify_time: ModifyTime::new(time),
    }
}

fn move_order(schema: u32, time: i64) -> DescriptorRecord {
    descriptor(
        schema,
        time,
        vec![
            DescriptorField::new("target", FieldKind::EntityRef),
            DescriptorField::new("position", FieldKind::Coordinates),
            DescriptorField::new("urgent", FieldKind::Bool),
        ],
    )
}

// ── Registration ─────────────────────────────────────────────────

#[test]
fn register_and_look_up() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    assert!(registry.contains(SchemaId::new(11)));
    assert_eq!(registry.get(SchemaId::new(11)).unwrap().name, "type-11");
    assert_eq!(registry.ids(), vec![SchemaId::new(11)]);
    assert_eq!(registry.len(), 1);
}

#[test]
fn newer_descriptor_replaces_older() {
    let mut registry = DescriptorRegistry::new();
    registry.register(descriptor(11, 5, Vec::new())).unwrap();
    registry.register(move_order(11, 6)).unwrap();

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(SchemaId::new(11)).unwrap().fields.len(), 3);
}

#[test]
fn stale_descriptor_is_rejected() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 10)).unwrap();

    let err = registry.register(move_order(11, 5)).unwrap_err();
    assert!(matches!(err, CacheError::StaleDescriptor { .. }), "{err}");
    assert_eq!(
        registry.get(SchemaId::new(11)).unwrap().modify_time,
        ModifyTime::new(10)
    );
}

#[test]
fn unchecked_descriptor_skips_the_staleness_check() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 10)).unwrap();
    registry.register(move_order(11, -1)).unwrap();
    assert!(registry.get(SchemaId::new(11)).unwrap().modify_time.is_unchecked());
}

#[test]
fn remove_forgets_the_schema() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    assert!(registry.remove(SchemaId::new(11)).is_some());
    assert!(!registry.contains(SchemaId::new(11)));
    assert!(registry.remove(SchemaId::new(11)).is_none());
    assert!(registry.is_empty());
}

// ── Field codec ──────────────────────────────────────────────────

#[test]
fn decode_accepts_a_matching_payload() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    let payload = br#"{"target": 7, "position": [10, 20, 30], "urgent": true}"#;
    let value = registry.decode_fields(SchemaId::new(11), payload).unwrap();
    assert_eq!(value["target"], 7);
}

#[test]
fn decode_rejects_an_unknown_schema() {
    let registry = DescriptorRegistry::new();
    let err = registry.decode_fields(SchemaId::new(99), b"{}").unwrap_err();
    assert!(matches!(err, CacheError::UnknownSchema(_)), "{err}");
}

#[test]
fn decode_rejects_a_missing_field() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    let payload = br#"{"target": 7, "urgent": false}"#;
    let err = registry.decode_fields(SchemaId::new(11), payload).unwrap_err();
    match err {
        CacheError::FieldMismatch { schema, reason } => {
            assert_eq!(schema, SchemaId::new(11));
            assert!(reason.contains("position"), "{reason}");
        }
        other => panic!("expected FieldMismatch, got {other}"),
    }
}

#[test]
fn decode_rejects_a_mistyped_field() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    // Coordinates must be a triple.
    let payload = br#"{"target": 7, "position": [10, 20], "urgent": true}"#;
    let err = registry.decode_fields(SchemaId::new(11), payload).unwrap_err();
    assert!(matches!(err, CacheError::FieldMismatch { .. }), "{err}");
}

#[test]
fn encode_validates_before_serializing() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    let good = serde_json::json!({"target": 7, "position": [1, 2, 3], "urgent": false});
    let bytes = registry.encode_fields(SchemaId::new(11), &good).unwrap();
    assert_eq!(
        registry.decode_fields(SchemaId::new(11), &bytes).unwrap(),
        good
    );

    let bad = serde_json::json!({"target": "seven", "position": [1, 2, 3], "urgent": false});
    let err = registry.encode_fields(SchemaId::new(11), &bad).unwrap_err();
    assert!(matches!(err, CacheError::FieldMismatch { .. }), "{err}");
}

#[test]
fn non_object_payloads_are_mismatches() {
    let mut registry = DescriptorRegistry::new();
    registry.register(move_order(11, 5)).unwrap();

    let err = registry.check_fields(SchemaId::new(11), &serde_json::json!([1, 2])).unwrap_err();
    assert!(matches!(err, CacheError::FieldMismatch { .. }), "{err}");
}

#[test]
fn json_fields_accept_anything() {
    let mut registry = DescriptorRegistry::new();
    registry
        .register(descriptor(
            12,
            1,
            vec![DescriptorField::new("blob", FieldKind::Json)],
        ))
        .unwrap();

    for payload in [
        serde_json::json!({"blob": null}),
        serde_json::json!({"blob": [1, "two", 3.0]}),
        serde_json::json!({"blob": {"nested": true}}),
    ] {
        registry.check_fields(SchemaId::new(12), &payload).unwrap();
    }
}
