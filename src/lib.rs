//! Client-side normalized cache for the sourcepods API.
//!
//! Server payloads flow gateway → normalizer → merge engine → entity tables;
//! the query layer derives read-only views from the tables, and the action
//! orchestrator is the only path that writes to them.

pub mod actions;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod normalize;
pub mod query;
pub mod schema;
pub mod store;

pub use actions::{Actions, CacheResult};
pub use error::{CacheError, ConsistencyWarning};
pub use gateway::{Credentials, EntityKey, Gateway, GatewayError};
pub use model::{Entity, EntityId, EntityType};
pub use query::Query;
pub use schema::{PayloadSource, Schema};
pub use store::{MergePolicies, MergePolicy, Store};
