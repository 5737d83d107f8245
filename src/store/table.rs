use std::collections::{BTreeMap, BTreeSet};

use super::merge::{merge, MergeError, MergePolicy};
use crate::model::{Entity, EntityId, EntityType};

/// Id-indexed records of a single entity type. At most one record per id.
///
/// Iteration follows id order; it carries no meaning beyond being stable.
#[derive(Debug, Clone)]
pub struct EntityTable {
    kind: EntityType,
    rows: BTreeMap<EntityId, Entity>,
}

impl EntityTable {
    pub fn new(kind: EntityType) -> Self {
        Self {
            kind,
            rows: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.rows.contains_key(id)
    }

    /// Computes what `upsert` would install, without touching the table.
    pub fn merged(&self, incoming: Entity, policy: MergePolicy) -> Result<Entity, MergeError> {
        if incoming.kind() != self.kind {
            return Err(MergeError::KindMismatch {
                existing: self.kind,
                incoming: incoming.kind(),
            });
        }
        merge(self.rows.get(incoming.id()), incoming, policy)
    }

    /// Merges `incoming` into the table. On error the table is unchanged.
    pub fn upsert(&mut self, incoming: Entity, policy: MergePolicy) -> Result<&Entity, MergeError> {
        let merged = self.merged(incoming, policy)?;
        let id = merged.id().clone();
        self.rows.insert(id.clone(), merged);
        Ok(&self.rows[&id])
    }

    /// Installs an already-merged record.
    pub(crate) fn install(&mut self, entity: Entity) {
        self.rows.insert(entity.id().clone(), entity);
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        self.rows.remove(id)
    }

    /// Drops every record whose id is not in `keep`; returns the dropped ids.
    pub fn retain_ids(&mut self, keep: &BTreeSet<EntityId>) -> Vec<EntityId> {
        let dropped: Vec<EntityId> = self
            .rows
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in &dropped {
            self.rows.remove(id);
        }
        dropped
    }

    pub fn all(&self) -> impl Iterator<Item = &Entity> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
