//! Reconciles an incoming record with the cached record of the same id.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{Entity, EntityId, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming fully replaces existing.
    Replace,
    /// Existing attributes overlaid by incoming's keys; existing-only keys
    /// survive, so a narrow listing never erases detail fields.
    #[default]
    ShallowMerge,
}

/// Global default plus per-type overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicies {
    #[serde(default)]
    pub default: MergePolicy,
    #[serde(default)]
    pub overrides: BTreeMap<EntityType, MergePolicy>,
}

impl MergePolicies {
    pub fn uniform(policy: MergePolicy) -> Self {
        Self {
            default: policy,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, kind: EntityType, policy: MergePolicy) -> Self {
        self.overrides.insert(kind, policy);
        self
    }

    pub fn for_kind(&self, kind: EntityType) -> MergePolicy {
        self.overrides.get(&kind).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("refusing to merge {incoming} into {existing}")]
    KindMismatch {
        existing: EntityType,
        incoming: EntityType,
    },
    #[error("refusing to merge {kind} `{incoming}` into `{existing}`")]
    IdMismatch {
        kind: EntityType,
        existing: EntityId,
        incoming: EntityId,
    },
}

/// Merges `incoming` over `existing`. With nothing cached, `incoming` is
/// installed verbatim.
pub fn merge(
    existing: Option<&Entity>,
    incoming: Entity,
    policy: MergePolicy,
) -> Result<Entity, MergeError> {
    let Some(existing) = existing else {
        return Ok(incoming);
    };
    if existing.kind() != incoming.kind() {
        return Err(MergeError::KindMismatch {
            existing: existing.kind(),
            incoming: incoming.kind(),
        });
    }
    if existing.id() != incoming.id() {
        return Err(MergeError::IdMismatch {
            kind: existing.kind(),
            existing: existing.id().clone(),
            incoming: incoming.id().clone(),
        });
    }

    match policy {
        MergePolicy::Replace => Ok(incoming),
        MergePolicy::ShallowMerge => {
            let kind = incoming.kind();
            let id = incoming.id().clone();
            let mut attrs = existing.attrs().clone();
            attrs.extend(incoming.into_attrs());
            Ok(Entity::new(kind, id, attrs))
        }
    }
}
