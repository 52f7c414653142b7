//! Named collections held by the cache.
//!
//! Read-only collections mutate only through the sync engine;
//! read-write collections additionally accept local edits through the
//! mutation pipeline. Compound collections are per-parent ordered
//! sub-collections addressed by slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every collection the cache aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Features,
    Objects,
    Boards,
    Resources,
    Components,
    Properties,
    Players,
    OrderTypes,
    MessageTypes,
    Categories,
    Designs,
    Orders,
    Messages,
}

impl Collection {
    /// Every collection, in the order the sync engine refreshes the
    /// simple ones.
    pub const ALL: [Collection; 13] = [
        Collection::Objects,
        Collection::Orders,
        Collection::Boards,
        Collection::Messages,
        Collection::OrderTypes,
        Collection::MessageTypes,
        Collection::Categories,
        Collection::Designs,
        Collection::Components,
        Collection::Properties,
        Collection::Resources,
        Collection::Players,
        Collection::Features,
    ];

    /// True for collections only the remote authority may change.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(
            self,
            Collection::Features
                | Collection::Objects
                | Collection::Boards
                | Collection::Resources
                | Collection::Components
                | Collection::Properties
                | Collection::Players
                | Collection::OrderTypes
                | Collection::MessageTypes
        )
    }

    /// True for collections the local application may edit.
    #[must_use]
    pub const fn is_read_write(&self) -> bool {
        !self.is_read_only()
    }

    /// True for per-parent ordered sub-collections.
    #[must_use]
    pub const fn is_compound(&self) -> bool {
        matches!(self, Collection::Orders | Collection::Messages)
    }

    /// The collection owning this one's parents, for compound
    /// collections.
    #[must_use]
    pub const fn parent(&self) -> Option<Collection> {
        match self {
            Collection::Orders => Some(Collection::Objects),
            Collection::Messages => Some(Collection::Boards),
            _ => None,
        }
    }

    /// The dependent sub-collection removed alongside entities of this
    /// collection.
    #[must_use]
    pub const fn children(&self) -> Option<Collection> {
        match self {
            Collection::Objects => Some(Collection::Orders),
            Collection::Boards => Some(Collection::Messages),
            _ => None,
        }
    }

    /// Stable lowercase name, used in progress events and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Collection::Features => "features",
            Collection::Objects => "objects",
            Collection::Boards => "boards",
            Collection::Resources => "resources",
            Collection::Components => "components",
            Collection::Properties => "properties",
            Collection::Players => "players",
            Collection::OrderTypes => "order_types",
            Collection::MessageTypes => "message_types",
            Collection::Categories => "categories",
            Collection::Designs => "designs",
            Collection::Orders => "orders",
            Collection::Messages => "messages",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
