//! Derived, read-only views over the store.
//!
//! Every view is recomputed on demand and returns owned snapshots: callers
//! may mutate what they get back without affecting the cached records.

use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

use crate::error::ConsistencyWarning;
use crate::model::{Entity, EntityId, EntityType, RelationState};
use crate::schema::{Cardinality, Schema};
use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    store: &'a Store,
    schema: &'a Schema,
}

impl<'a> Query<'a> {
    pub fn new(store: &'a Store, schema: &'a Schema) -> Self {
        Self { store, schema }
    }

    pub fn by_id(&self, kind: EntityType, id: &EntityId) -> Option<Entity> {
        self.store.get(kind, id).cloned()
    }

    pub fn all(&self, kind: EntityType) -> Vec<Entity> {
        self.store.all(kind).cloned().collect()
    }

    /// First record (in table order) whose `key` attribute equals `value`.
    /// More than one match is reported as a consistency warning.
    pub fn by_natural_key(&self, kind: EntityType, key: &str, value: &str) -> Option<Entity> {
        let matches: Vec<&Entity> = self
            .store
            .all(kind)
            .filter(|entity| entity.get_str(key).as_deref() == Some(value))
            .collect();
        if matches.len() > 1 {
            report(&ConsistencyWarning::DuplicateNaturalKey {
                kind,
                key: key.to_string(),
                value: value.to_string(),
                ids: matches.iter().map(|e| e.id().clone()).collect(),
            });
        }
        matches.first().map(|entity| (*entity).clone())
    }

    pub fn user_by_username(&self, username: &str) -> Option<Entity> {
        self.by_natural_key(EntityType::User, "username", username)
    }

    /// Resolves the children referenced by `parent.field`.
    ///
    /// A loaded id list on the parent is authoritative (empty means none);
    /// ids missing from the child table are skipped as not yet loaded. If the
    /// parent never received the field, children are inferred through the
    /// relation's back-reference, when the schema declares one.
    pub fn related_to(
        &self,
        parent_kind: EntityType,
        parent_id: &EntityId,
        field: &str,
    ) -> Vec<Entity> {
        let Some(relation) = self.schema.relation(parent_kind, field) else {
            debug!(%parent_kind, field, "no such relation");
            return Vec::new();
        };
        let Some(parent) = self.store.get(parent_kind, parent_id) else {
            trace!(%parent_kind, %parent_id, "parent not loaded");
            return Vec::new();
        };

        match parent.relation(field) {
            RelationState::Loaded(ids) => ids
                .iter()
                .filter_map(|id| {
                    let child = self.store.get(relation.target, id).cloned();
                    if child.is_none() {
                        trace!(target_kind = %relation.target, %id, "related record not loaded yet");
                    }
                    child
                })
                .collect(),
            RelationState::Unknown => match relation.inverse {
                Some(inverse) => self
                    .store
                    .all(relation.target)
                    .filter(|child| child.references(inverse, parent_id))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            },
        }
    }

    /// The entity behind the auth pointer; absent when unset or dangling.
    pub fn current_user(&self) -> Option<Entity> {
        let id = self.store.authenticated_id()?;
        let user = self.by_id(EntityType::User, id);
        if user.is_none() {
            debug!(%id, "auth pointer is dangling");
        }
        user
    }

    /// Looks an entity up by its external key: a username for users,
    /// `owner/name` for repositories.
    pub fn resolve_key(&self, kind: EntityType, key: &str) -> Option<Entity> {
        match kind {
            EntityType::User => self.user_by_username(key),
            EntityType::Repository => {
                let (owner, name) = key.split_once('/')?;
                let owner = self.user_by_username(owner)?;
                self.related_to(EntityType::User, owner.id(), "repositories")
                    .into_iter()
                    .find(|repo| repo.get_str("name").as_deref() == Some(name))
            }
        }
    }

    /// Scans every table for duplicate natural keys and dangling relation ids.
    pub fn consistency_report(&self) -> Vec<ConsistencyWarning> {
        let mut warnings = Vec::new();

        for kind in EntityType::ALL {
            if let Some(key) = self.schema.natural_key(kind) {
                let mut seen: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();
                for entity in self.store.all(kind) {
                    if let Some(value) = entity.get_str(key) {
                        seen.entry(value).or_default().push(entity.id().clone());
                    }
                }
                warnings.extend(seen.into_iter().filter(|(_, ids)| ids.len() > 1).map(
                    |(value, ids)| ConsistencyWarning::DuplicateNaturalKey {
                        kind,
                        key: key.to_string(),
                        value,
                        ids,
                    },
                ));
            }

            for relation in self.schema.relations(kind) {
                for entity in self.store.all(kind) {
                    let RelationState::Loaded(ids) = entity.relation(relation.field) else {
                        continue;
                    };
                    if relation.cardinality == Cardinality::One && ids.is_empty() {
                        continue;
                    }
                    warnings.extend(
                        ids.into_iter()
                            .filter(|id| self.store.get(relation.target, id).is_none())
                            .map(|missing| ConsistencyWarning::DanglingRelation {
                                kind,
                                id: entity.id().clone(),
                                field: relation.field.to_string(),
                                target: relation.target,
                                missing,
                            }),
                    );
                }
            }
        }

        for warning in &warnings {
            report(warning);
        }
        warnings
    }
}

fn report(warning: &ConsistencyWarning) {
    warn!(%warning, "consistency warning");
}
