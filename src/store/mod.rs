//! Local normalized store: one table per entity type plus the auth pointer.
//!
//! This module is split into two submodules:
//! - `table`: the id-indexed table of a single entity type.
//! - `merge`: the policies reconciling incoming and cached records.
//!
//! A `Store` is an explicit context object owned by the application root.
//! It is only touched from one thread; concurrent fetches interleave between
//! mutations, never inside one.

pub mod merge;
pub mod table;

pub use merge::{MergeError, MergePolicies, MergePolicy};
pub use table::EntityTable;

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::model::{Entity, EntityId, EntityType};

#[derive(Debug, Clone)]
pub struct Store {
    tables: BTreeMap<EntityType, EntityTable>,
    policies: MergePolicies,
    authenticated: Option<EntityId>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(MergePolicies::default())
    }
}

impl Store {
    pub fn new(policies: MergePolicies) -> Self {
        let tables = EntityType::ALL
            .into_iter()
            .map(|kind| (kind, EntityTable::new(kind)))
            .collect();
        Self {
            tables,
            policies,
            authenticated: None,
        }
    }

    pub fn policies(&self) -> &MergePolicies {
        &self.policies
    }

    pub fn table(&self, kind: EntityType) -> &EntityTable {
        &self.tables[&kind]
    }

    fn table_mut(&mut self, kind: EntityType) -> &mut EntityTable {
        self.tables
            .entry(kind)
            .or_insert_with(|| EntityTable::new(kind))
    }

    pub fn get(&self, kind: EntityType, id: &EntityId) -> Option<&Entity> {
        self.table(kind).get(id)
    }

    pub fn all(&self, kind: EntityType) -> impl Iterator<Item = &Entity> {
        self.table(kind).all()
    }

    pub fn upsert(&mut self, entity: Entity) -> Result<&Entity, MergeError> {
        let kind = entity.kind();
        let policy = self.policies.for_kind(kind);
        self.table_mut(kind).upsert(entity, policy)
    }

    /// Merges a batch of records all-or-nothing: every merge is computed
    /// first, and nothing is installed unless all of them succeed.
    pub fn apply<I>(&mut self, records: I) -> Result<usize, MergeError>
    where
        I: IntoIterator<Item = Entity>,
    {
        let mut staged: BTreeMap<(EntityType, EntityId), Entity> = BTreeMap::new();
        for incoming in records {
            let kind = incoming.kind();
            let key = (kind, incoming.id().clone());
            let policy = self.policies.for_kind(kind);
            let merged = match staged.remove(&key) {
                Some(pending) => merge::merge(Some(&pending), incoming, policy)?,
                None => self.table(kind).merged(incoming, policy)?,
            };
            staged.insert(key, merged);
        }

        let count = staged.len();
        for ((kind, _), entity) in staged {
            self.table_mut(kind).install(entity);
        }
        debug!(count, "applied records");
        Ok(count)
    }

    pub fn remove(&mut self, kind: EntityType, id: &EntityId) -> Option<Entity> {
        self.table_mut(kind).remove(id)
    }

    /// Evicts every record of `kind` missing from `listed`.
    pub fn evict_unlisted(&mut self, kind: EntityType, listed: &[EntityId]) -> Vec<EntityId> {
        let keep: BTreeSet<EntityId> = listed.iter().cloned().collect();
        self.table_mut(kind).retain_ids(&keep)
    }

    /// The raw auth pointer. It may dangle; see `Query::current_user`.
    pub fn authenticated_id(&self) -> Option<&EntityId> {
        self.authenticated.as_ref()
    }

    pub(crate) fn set_authenticated(&mut self, id: EntityId) {
        self.authenticated = Some(id);
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(EntityTable::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
