use orrery_types::{EntityId, NodeHandle, SchemaId};
use std::collections::HashSet;
use std::str::FromStr;

// ── EntityId ──────────────────────────────────────────────────────

#[test]
fn root_is_zero() {
    assert_eq!(EntityId::ROOT, EntityId::new(0));
    assert!(EntityId::ROOT.is_root());
    assert!(!EntityId::new(1).is_root());
}

#[test]
fn entity_id_display_and_parse() {
    let id = EntityId::new(42);
    let s = id.to_string();
    assert_eq!(s, "42");
    let parsed: EntityId = s.parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn entity_id_from_str_invalid() {
    assert!(EntityId::from_str("not-a-number").is_err());
    assert!(EntityId::from_str("-1").is_err());
}

#[test]
fn entity_id_ordering_follows_raw_value() {
    assert!(EntityId::new(1) < EntityId::new(2));
    assert!(EntityId::ROOT < EntityId::new(1));
}

#[test]
fn entity_id_hash_and_eq() {
    let mut set = HashSet::new();
    set.insert(EntityId::new(7));
    set.insert(EntityId::new(7));
    assert_eq!(set.len(), 1);
}

#[test]
fn entity_id_serde_is_transparent() {
    let id = EntityId::new(99);
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "99");
    let parsed: EntityId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}

// ── SchemaId ──────────────────────────────────────────────────────

#[test]
fn schema_id_roundtrips() {
    let schema = SchemaId::new(11);
    assert_eq!(schema.as_u32(), 11);
    assert_eq!(schema.to_string(), "11");

    let json = serde_json::to_string(&schema).unwrap();
    assert_eq!(json, "11");
    let parsed: SchemaId = serde_json::from_str(&json).unwrap();
    assert_eq!(schema, parsed);
}

#[test]
fn schema_id_from_raw() {
    let schema: SchemaId = 5u32.into();
    assert_eq!(schema, SchemaId::new(5));
}

// ── NodeHandle ────────────────────────────────────────────────────

#[test]
fn handle_display_shows_index_and_generation() {
    let handle = NodeHandle::new(3, 2);
    assert_eq!(handle.to_string(), "3v2");
}

#[test]
fn handles_differ_by_generation() {
    let first = NodeHandle::new(0, 0);
    let reused = NodeHandle::new(0, 1);
    assert_ne!(first, reused);

    let mut set = HashSet::new();
    set.insert(first);
    set.insert(reused);
    assert_eq!(set.len(), 2);
}
