use thiserror::Error;

use crate::gateway::GatewayError;
use crate::model::{EntityId, EntityType};
use crate::normalize::NormalizeError;
use crate::schema::PayloadSource;
use crate::store::MergeError;

/// Failure surfaced to callers of the action orchestrator. No variant is
/// produced after a partial table mutation.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("network failure: {0}")]
    Network(#[source] GatewayError),
    #[error("{kind} `{key}` not found")]
    NotFound { kind: EntityType, key: String },
    #[error("invalid {kind} key `{key}`")]
    InvalidKey { kind: EntityType, key: String },
    #[error("{operation} is not supported over {via}")]
    Unsupported {
        operation: &'static str,
        via: PayloadSource,
    },
    #[error("malformed payload: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("merge rejected: {0}")]
    Merge(#[from] MergeError),
}

impl From<GatewayError> for CacheError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { kind, key } => CacheError::NotFound { kind, key },
            GatewayError::InvalidKey { kind, key } => CacheError::InvalidKey { kind, key },
            GatewayError::Unsupported { operation, via } => {
                CacheError::Unsupported { operation, via }
            }
            other => CacheError::Network(other),
        }
    }
}

impl CacheError {
    pub fn is_network(&self) -> bool {
        matches!(self, CacheError::Network(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}

/// Non-fatal inconsistency found while reading the store. Reported through
/// `tracing` and never aborts the read.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyWarning {
    #[error("{kind} natural key {key}=`{value}` is shared by {ids:?}")]
    DuplicateNaturalKey {
        kind: EntityType,
        key: String,
        value: String,
        ids: Vec<EntityId>,
    },
    #[error("{kind} `{id}` field `{field}` references missing {target} `{missing}`")]
    DanglingRelation {
        kind: EntityType,
        id: EntityId,
        field: String,
        target: EntityType,
        missing: EntityId,
    },
}
