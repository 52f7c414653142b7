//! The cache aggregate.
//!
//! One `Cache` instance mirrors one player's view of one game on one
//! server. It owns the simple versioned stores, the descriptor
//! registries, and the per-parent pending lists, and persists itself
//! to a single snapshot file it exclusively owns for the process
//! lifetime.

use crate::descriptor::DescriptorRegistry;
use crate::error::CacheResult;
use crate::pending::PendingList;
use crate::snapshot;
use crate::versioned::VersionedStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use orrery_types::{BoardRecord, EntityId, GenericRecord, MessageRecord, ObjectRecord, OrderRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Canonical identity of a cache: which player's view of which game on
/// which server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    canonical: String,
}

const KNOWN_SCHEMES: [&str; 4] = ["tp://", "tps://", "http://", "https://"];

impl CacheKey {
    /// Canonicalizes `(server, game, username)` to
    /// `scheme://username@server/game`. A missing scheme defaults to
    /// `tp://`; a username already embedded in the server address is
    /// kept.
    #[must_use]
    pub fn new(server: &str, game: &str, username: &str) -> Self {
        let mut key = server.trim_end_matches('/').to_string();
        if !KNOWN_SCHEMES.iter().any(|p| key.starts_with(p)) {
            key = format!("tp://{key}");
        }
        if !key.contains('@') {
            if let Some((scheme, rest)) = key.split_once("//") {
                key = format!("{scheme}//{username}@{rest}");
            }
        }
        if !game.is_empty() {
            key = format!("{key}/{game}");
        }
        Self { canonical: key }
    }

    /// The canonical key string.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Filesystem-safe escape of the canonical key, used as the
    /// snapshot file name component.
    #[must_use]
    pub fn escaped(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.canonical.as_bytes())
    }
}

/// Local mirror of server-authoritative world state.
#[derive(Debug)]
pub struct Cache {
    key: CacheKey,
    path: PathBuf,

    // Read-only collections: mutated only by the sync engine.
    pub features: VersionedStore<GenericRecord>,
    pub objects: VersionedStore<ObjectRecord>,
    pub boards: VersionedStore<BoardRecord>,
    pub resources: VersionedStore<GenericRecord>,
    pub components: VersionedStore<GenericRecord>,
    pub properties: VersionedStore<GenericRecord>,
    pub players: VersionedStore<GenericRecord>,
    pub order_types: DescriptorRegistry,
    pub message_types: DescriptorRegistry,

    // Read-write collections: also accept local edits through the
    // mutation pipeline.
    pub categories: VersionedStore<GenericRecord>,
    pub designs: VersionedStore<GenericRecord>,

    // Compound collections, one ordered list per parent.
    pub orders: HashMap<EntityId, PendingList<OrderRecord>>,
    pub messages: HashMap<EntityId, PendingList<MessageRecord>>,
}

impl Cache {
    /// Creates an empty cache for `key`, persisting under `dir`.
    #[must_use]
    pub fn fresh(dir: impl AsRef<Path>, key: CacheKey) -> Self {
        let path = dir.as_ref().join(format!("cache.{}", key.escaped()));
        Self {
            key,
            path,
            features: VersionedStore::new(),
            objects: VersionedStore::new(),
            boards: VersionedStore::new(),
            resources: VersionedStore::new(),
            components: VersionedStore::new(),
            properties: VersionedStore::new(),
            players: VersionedStore::new(),
            order_types: DescriptorRegistry::new(),
            message_types: DescriptorRegistry::new(),
            categories: VersionedStore::new(),
            designs: VersionedStore::new(),
            orders: HashMap::new(),
            messages: HashMap::new(),
        }
    }

    /// Opens the cache for `key`, restoring the previous snapshot when
    /// one exists. Any load error falls back to an empty cache.
    #[must_use]
    pub fn open(dir: impl AsRef<Path>, key: CacheKey) -> Self {
        let mut cache = Self::fresh(dir, key);
        if !cache.path.exists() {
            info!(path = %cache.path.display(), "no saved cache, starting fresh");
            return cache;
        }
        match cache.load() {
            Ok(()) => {
                info!(path = %cache.path.display(), "restored saved cache");
                cache
            }
            Err(e) => {
                warn!(
                    path = %cache.path.display(),
                    error = %e,
                    "unable to restore saved cache, starting fresh"
                );
                let key = cache.key.clone();
                let dir = cache
                    .path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                Self::fresh(dir, key)
            }
        }
    }

    /// The cache identity.
    #[must_use]
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the snapshot file.
    pub fn save(&self) -> CacheResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        snapshot::write_snapshot(self, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reloads state from the snapshot file into this cache.
    pub fn load(&mut self) -> CacheResult<()> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        snapshot::read_snapshot(&mut reader, self)
    }

    /// The order list for an object, created empty on first touch.
    pub fn orders_mut(&mut self, parent: EntityId) -> &mut PendingList<OrderRecord> {
        self.orders.entry(parent).or_default()
    }

    /// The message list for a board, created empty on first touch.
    pub fn messages_mut(&mut self, parent: EntityId) -> &mut PendingList<MessageRecord> {
        self.messages.entry(parent).or_default()
    }

    /// Removes an object together with its dependent order list.
    pub fn remove_object(&mut self, id: EntityId) {
        self.objects.remove(id);
        self.orders.remove(&id);
    }

    /// Removes a board together with its dependent message list.
    pub fn remove_board(&mut self, id: EntityId) {
        self.boards.remove(id);
        self.messages.remove(&id);
    }
}
