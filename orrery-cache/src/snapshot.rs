//! Snapshot persistence for the cache.
//!
//! The on-disk layout is a fixed binary framing over JSON payloads:
//!
//! ```text
//! u32  version tag
//! u32  order-type descriptor count,   then that many descriptor blocks
//! u32  message-type descriptor count, then that many descriptor blocks
//! u32  body length, then the JSON body (every versioned store)
//! repeated until EOF:
//!     record header (12 bytes: kind, schema, payload length)
//!     payload (JSON)
//!     u64 parent id  -- order/message records only, absent for
//!                       descriptor records
//! ```
//!
//! All integers are big-endian. A clean EOF exactly at a header
//! boundary terminates the stream; a short non-zero read there means
//! the file was truncated mid-record and is treated as corruption.
//! Pending lists persist their confirmed values only; every restored
//! sub-item comes back as a fresh idle node.

use crate::cache::Cache;
use crate::descriptor::DescriptorRegistry;
use crate::error::{CacheError, CacheResult};
use crate::versioned::VersionedStore;
use orrery_types::{
    BoardRecord, DescriptorRecord, EntityId, GenericRecord, MessageRecord, ModifyTime,
    ObjectRecord, OrderRecord, SchemaId,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 3;

/// Size of the fixed record header.
const HEADER_LEN: usize = 12;

/// Upper bound on any single payload or the store body.
const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// What a framed record in the snapshot contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    OrderType = 1,
    MessageType = 2,
    Order = 3,
    Message = 4,
}

impl RecordKind {
    fn from_u32(raw: u32) -> CacheResult<Self> {
        match raw {
            1 => Ok(RecordKind::OrderType),
            2 => Ok(RecordKind::MessageType),
            3 => Ok(RecordKind::Order),
            4 => Ok(RecordKind::Message),
            other => Err(CacheError::CorruptSnapshot(format!(
                "unknown record kind {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    kind: RecordKind,
    schema: SchemaId,
    length: u32,
}

impl RecordHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&(self.kind as u32).to_be_bytes());
        bytes[4..8].copy_from_slice(&self.schema.as_u32().to_be_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8; HEADER_LEN]) -> CacheResult<Self> {
        let kind = RecordKind::from_u32(u32::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ]))?;
        let schema = SchemaId::new(u32::from_be_bytes([
            bytes[4], bytes[5], bytes[6], bytes[7],
        ]));
        let length = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        Ok(Self {
            kind,
            schema,
            length,
        })
    }
}

/// Every versioned store, serialized as sorted `(id, time, value)`
/// entry lists.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    features: Vec<(EntityId, ModifyTime, GenericRecord)>,
    objects: Vec<(EntityId, ModifyTime, ObjectRecord)>,
    boards: Vec<(EntityId, ModifyTime, BoardRecord)>,
    resources: Vec<(EntityId, ModifyTime, GenericRecord)>,
    components: Vec<(EntityId, ModifyTime, GenericRecord)>,
    properties: Vec<(EntityId, ModifyTime, GenericRecord)>,
    players: Vec<(EntityId, ModifyTime, GenericRecord)>,
    categories: Vec<(EntityId, ModifyTime, GenericRecord)>,
    designs: Vec<(EntityId, ModifyTime, GenericRecord)>,
}

// ── Writing ──────────────────────────────────────────────────────

/// Serializes the whole cache to `writer` in the snapshot format.
pub fn write_snapshot(cache: &Cache, writer: &mut impl Write) -> CacheResult<()> {
    writer.write_all(&SNAPSHOT_VERSION.to_be_bytes())?;

    write_registry(writer, &cache.order_types, RecordKind::OrderType)?;
    write_registry(writer, &cache.message_types, RecordKind::MessageType)?;

    let body = SnapshotBody {
        features: cache.features.entries(),
        objects: cache.objects.entries(),
        boards: cache.boards.entries(),
        resources: cache.resources.entries(),
        components: cache.components.entries(),
        properties: cache.properties.entries(),
        players: cache.players.entries(),
        categories: cache.categories.entries(),
        designs: cache.designs.entries(),
    };
    let bytes = serde_json::to_vec(&body)?;
    check_payload_len(bytes.len())?;
    writer.write_all(&(bytes.len() as u32).to_be_bytes())?;
    writer.write_all(&bytes)?;

    let mut order_parents: Vec<EntityId> = cache.orders.keys().copied().collect();
    order_parents.sort_unstable();
    for parent in order_parents {
        for order in cache.orders[&parent].confirmed_values() {
            write_record(writer, RecordKind::Order, order.schema, order, Some(parent))?;
        }
    }

    let mut message_parents: Vec<EntityId> = cache.messages.keys().copied().collect();
    message_parents.sort_unstable();
    for parent in message_parents {
        for message in cache.messages[&parent].confirmed_values() {
            write_record(
                writer,
                RecordKind::Message,
                message.schema,
                message,
                Some(parent),
            )?;
        }
    }

    Ok(())
}

fn write_registry(
    writer: &mut impl Write,
    registry: &DescriptorRegistry,
    kind: RecordKind,
) -> CacheResult<()> {
    let ids = registry.ids();
    writer.write_all(&(ids.len() as u32).to_be_bytes())?;
    for schema in ids {
        if let Some(descriptor) = registry.get(schema) {
            write_record(writer, kind, schema, descriptor, None)?;
        }
    }
    Ok(())
}

fn write_record<T: Serialize>(
    writer: &mut impl Write,
    kind: RecordKind,
    schema: SchemaId,
    payload: &T,
    parent: Option<EntityId>,
) -> CacheResult<()> {
    let bytes = serde_json::to_vec(payload)?;
    check_payload_len(bytes.len())?;
    let header = RecordHeader {
        kind,
        schema,
        length: bytes.len() as u32,
    };
    writer.write_all(&header.to_bytes())?;
    writer.write_all(&bytes)?;
    if let Some(parent) = parent {
        writer.write_all(&u64::from(parent.as_u32()).to_be_bytes())?;
    }
    Ok(())
}

fn check_payload_len(len: usize) -> CacheResult<()> {
    if len > MAX_PAYLOAD {
        return Err(CacheError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot payload too large: {len} bytes"),
        )));
    }
    Ok(())
}

// ── Reading ──────────────────────────────────────────────────────

/// Restores a cache from `reader`, written by [`write_snapshot`].
pub fn read_snapshot(reader: &mut impl Read, cache: &mut Cache) -> CacheResult<()> {
    let version = read_u32(reader, "version tag")?;
    if version != SNAPSHOT_VERSION {
        return Err(CacheError::CorruptSnapshot(format!(
            "snapshot version {version}, expected {SNAPSHOT_VERSION}"
        )));
    }

    read_registry(reader, RecordKind::OrderType, &mut cache.order_types)?;
    read_registry(reader, RecordKind::MessageType, &mut cache.message_types)?;

    let body_len = read_u32(reader, "store body length")? as usize;
    check_read_len(body_len)?;
    let mut body_bytes = vec![0u8; body_len];
    read_exact(reader, &mut body_bytes, "store body")?;
    let body: SnapshotBody = serde_json::from_slice(&body_bytes)
        .map_err(|e| CacheError::CorruptSnapshot(format!("store body: {e}")))?;

    cache.features = VersionedStore::restore(body.features);
    cache.objects = VersionedStore::restore(body.objects);
    cache.boards = VersionedStore::restore(body.boards);
    cache.resources = VersionedStore::restore(body.resources);
    cache.components = VersionedStore::restore(body.components);
    cache.properties = VersionedStore::restore(body.properties);
    cache.players = VersionedStore::restore(body.players);
    cache.categories = VersionedStore::restore(body.categories);
    cache.designs = VersionedStore::restore(body.designs);

    while let Some(header) = read_header_or_eof(reader)? {
        check_read_len(header.length as usize)?;
        let mut payload = vec![0u8; header.length as usize];
        read_exact(reader, &mut payload, "record payload")?;

        match header.kind {
            RecordKind::Order => {
                let order: OrderRecord = decode(&payload, header)?;
                let parent = read_parent(reader)?;
                cache.orders_mut(parent).push_confirmed(order);
            }
            RecordKind::Message => {
                let message: MessageRecord = decode(&payload, header)?;
                let parent = read_parent(reader)?;
                cache.messages_mut(parent).push_confirmed(message);
            }
            RecordKind::OrderType => {
                let descriptor: DescriptorRecord = decode(&payload, header)?;
                cache.order_types.register(descriptor)?;
            }
            RecordKind::MessageType => {
                let descriptor: DescriptorRecord = decode(&payload, header)?;
                cache.message_types.register(descriptor)?;
            }
        }
    }

    // Parents that had no recorded sub-items still get a list.
    for id in cache.objects.ids() {
        cache.orders.entry(id).or_default();
    }
    for id in cache.boards.ids() {
        cache.messages.entry(id).or_default();
    }

    Ok(())
}

fn read_registry(
    reader: &mut impl Read,
    expected: RecordKind,
    registry: &mut DescriptorRegistry,
) -> CacheResult<()> {
    let count = read_u32(reader, "descriptor count")?;
    for _ in 0..count {
        let mut bytes = [0u8; HEADER_LEN];
        read_exact(reader, &mut bytes, "descriptor header")?;
        let header = RecordHeader::from_bytes(&bytes)?;
        if header.kind != expected {
            return Err(CacheError::CorruptSnapshot(format!(
                "descriptor table holds a {:?} record",
                header.kind
            )));
        }
        check_read_len(header.length as usize)?;
        let mut payload = vec![0u8; header.length as usize];
        read_exact(reader, &mut payload, "descriptor payload")?;
        let descriptor: DescriptorRecord = decode(&payload, header)?;
        registry.register(descriptor)?;
    }
    Ok(())
}

fn decode<T: DeserializeOwned + HasSchema>(payload: &[u8], header: RecordHeader) -> CacheResult<T> {
    let record: T = serde_json::from_slice(payload)
        .map_err(|e| CacheError::CorruptSnapshot(format!("record payload: {e}")))?;
    if record.schema() != header.schema {
        return Err(CacheError::CorruptSnapshot(format!(
            "record schema {} disagrees with header schema {}",
            record.schema(),
            header.schema
        )));
    }
    Ok(record)
}

/// Records that carry their schema tag, for header cross-checking.
trait HasSchema {
    fn schema(&self) -> SchemaId;
}

impl HasSchema for OrderRecord {
    fn schema(&self) -> SchemaId {
        self.schema
    }
}

impl HasSchema for MessageRecord {
    fn schema(&self) -> SchemaId {
        self.schema
    }
}

impl HasSchema for DescriptorRecord {
    fn schema(&self) -> SchemaId {
        self.schema
    }
}

fn read_parent(reader: &mut impl Read) -> CacheResult<EntityId> {
    let mut bytes = [0u8; 8];
    read_exact(reader, &mut bytes, "parent id")?;
    let raw = u64::from_be_bytes(bytes);
    u32::try_from(raw)
        .map(EntityId::new)
        .map_err(|_| CacheError::CorruptSnapshot(format!("parent id {raw} out of range")))
}

fn read_u32(reader: &mut impl Read, what: &str) -> CacheResult<u32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes, what)?;
    Ok(u32::from_be_bytes(bytes))
}

fn check_read_len(len: usize) -> CacheResult<()> {
    if len > MAX_PAYLOAD {
        return Err(CacheError::CorruptSnapshot(format!(
            "payload length {len} exceeds limit"
        )));
    }
    Ok(())
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8], what: &str) -> CacheResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CacheError::CorruptSnapshot(format!("truncated {what}"))
        } else {
            CacheError::Io(e)
        }
    })
}

/// Reads the next record header, distinguishing a clean EOF (the
/// normal terminator) from a short read mid-header (corruption).
fn read_header_or_eof(reader: &mut impl Read) -> CacheResult<Option<RecordHeader>> {
    let mut bytes = [0u8; HEADER_LEN];
    let mut filled = 0usize;
    while filled < HEADER_LEN {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CacheError::Io(e)),
        }
    }
    match filled {
        0 => Ok(None),
        n if n < HEADER_LEN => Err(CacheError::CorruptSnapshot(
            "garbage at end of snapshot".into(),
        )),
        _ => RecordHeader::from_bytes(&bytes).map(Some),
    }
}
