use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::host::HostError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Host error: {0}")]
    Host(HostError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Node not found: {0}")]
    MissingEntity(Uuid),

    #[error("Node is not an incremental item: {0}")]
    NotIncremental(Uuid),

    #[error("Malformed data on {id}: {reason}")]
    MalformedPersistedData { id: Uuid, reason: String },

    #[error("Priority cache unavailable")]
    CacheUnavailable,
}

/// A node the host no longer knows is a missing entity, not a host failure
impl From<HostError> for EngineError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NodeNotFound(id) => Self::MissingEntity(id),
            other => Self::Host(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
