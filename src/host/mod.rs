//! Collaborator seams
//!
//! The engine never owns notebook nodes or flashcards. It reads and writes
//! them through [`KnowledgeBase`] and [`FlashcardSource`]; every call is a
//! potential suspension point.

mod file_storage;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub use file_storage::FileStorage;
pub use memory::{HostSnapshot, MemoryHost, Node};

/// Tag placed on nodes that are incremental items
pub const INCREMENTAL_MARKER: &str = "incremental";

/// Node property holding the serialized incremental item
pub const PROP_INCREMENTAL: &str = "incremental";

/// Node property holding the card priority attribute
pub const PROP_CARD_PRIORITY: &str = "cardPriority";

/// Node property holding the archived history of a dismissed item
pub const PROP_DISMISSED: &str = "dismissedIncremental";

/// Node property marking a generated review document
pub const PROP_REVIEW_DOCUMENT: &str = "reviewDocument";

/// Durable key of the knowledge-base wide card priority cache
pub const CARD_PRIORITY_CACHE_KEY: &str = "cardPriorityCache";

#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Data directory not found")]
    DataDirNotFound,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Which key-value store a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Dropped when the host session ends
    Session,
    /// Survives restarts
    Durable,
}

/// A flashcard as seen by the engine: identity and due date only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDue {
    pub card_id: Uuid,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub due: DateTime<Utc>,
}

impl CardDue {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due <= now
    }
}

/// Node storage and hierarchy primitives of the host
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Whether the node still resolves
    async fn exists(&self, id: Uuid) -> HostResult<bool>;

    async fn get_property(&self, id: Uuid, key: &str) -> HostResult<Option<Value>>;

    /// `None` removes the property
    async fn set_property(&self, id: Uuid, key: &str, value: Option<Value>) -> HostResult<()>;

    async fn parent_of(&self, id: Uuid) -> HostResult<Option<Uuid>>;

    /// All descendants in document order
    async fn descendants_of(&self, id: Uuid) -> HostResult<Vec<Uuid>>;

    /// Nodes shown inside the document, including portal members
    async fn portal_members_of(&self, id: Uuid) -> HostResult<Vec<Uuid>>;

    /// Nodes queued in the folder
    async fn folder_queue_of(&self, id: Uuid) -> HostResult<Vec<Uuid>>;

    /// Bibliographic sources of the node
    async fn sources_of(&self, id: Uuid) -> HostResult<Vec<Uuid>>;

    /// Nodes referencing the node (backlinks)
    async fn referencing_of(&self, id: Uuid) -> HostResult<Vec<Uuid>>;

    async fn add_tag(&self, id: Uuid, marker: &str) -> HostResult<()>;

    async fn remove_tag(&self, id: Uuid, marker: &str) -> HostResult<()>;

    /// All nodes carrying the tag, in document order
    async fn tagged_with(&self, marker: &str) -> HostResult<Vec<Uuid>>;

    async fn get_value(&self, store: StoreKind, key: &str) -> HostResult<Option<Value>>;

    /// `None` removes the key
    async fn set_value(&self, store: StoreKind, key: &str, value: Option<Value>) -> HostResult<()>;
}

/// Read-only view of the host flashcard engine
#[async_trait]
pub trait FlashcardSource: Send + Sync {
    async fn cards_of(&self, id: Uuid) -> HostResult<Vec<CardDue>>;

    /// Every node that owns at least one card
    async fn nodes_with_cards(&self) -> HostResult<Vec<Uuid>>;
}
