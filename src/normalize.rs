//! Flattens denormalized payloads into per-type records.
//!
//! The walk is depth-first: embedded entities are normalized before the
//! record that embeds them is first emitted, and their attribute is replaced
//! by the id reference (or list of references). Each `(type, id)` yields one
//! record per pass; later occurrences shallow-merge into it. Re-entering an
//! entity that is still being walked is a cycle and ends in a bare reference.

use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::trace;

use crate::model::{Entity, EntityId, EntityType};
use crate::schema::{Cardinality, Schema};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("expected {kind} payload to be {expected}, found {found}")]
    UnexpectedShape {
        kind: EntityType,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{kind} payload has no usable `id`")]
    MissingId { kind: EntityType },
    #[error("relation `{field}` on {kind} must be a list, found {found}")]
    ExpectedList {
        kind: EntityType,
        field: String,
        found: &'static str,
    },
}

/// Output of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    roots: Vec<EntityId>,
    records: Vec<Entity>,
}

impl Normalized {
    /// Ids of the top-level entities, in payload order.
    pub fn roots(&self) -> &[EntityId] {
        &self.roots
    }

    /// Flat records of every touched type, one per `(type, id)`, in the
    /// order each was first emitted.
    pub fn records(&self) -> &[Entity] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Entity> {
        self.records
    }

    pub fn record(&self, kind: EntityType, id: &EntityId) -> Option<&Entity> {
        self.records
            .iter()
            .find(|record| record.kind() == kind && record.id() == id)
    }

    pub fn count(&self, kind: EntityType) -> usize {
        self.records.iter().filter(|r| r.kind() == kind).count()
    }
}

/// Normalizes a single-entity payload.
pub fn normalize(
    schema: &Schema,
    kind: EntityType,
    payload: &Value,
) -> Result<Normalized, NormalizeError> {
    let mut walker = Walker::new(schema);
    let root = walker.visit_root(kind, payload)?;
    let id = EntityId::from_value(&root).ok_or(NormalizeError::MissingId { kind })?;
    Ok(walker.finish(vec![id]))
}

/// Normalizes a listing payload (a JSON array of entities). `null` is read
/// as an empty listing.
pub fn normalize_list(
    schema: &Schema,
    kind: EntityType,
    payload: &Value,
) -> Result<Normalized, NormalizeError> {
    let items = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Null => &[],
        other => {
            return Err(NormalizeError::UnexpectedShape {
                kind,
                expected: "a list",
                found: shape(other),
            })
        }
    };

    let mut walker = Walker::new(schema);
    let mut roots = Vec::with_capacity(items.len());
    for item in items {
        let reference = walker.visit_root(kind, item)?;
        let id = EntityId::from_value(&reference).ok_or(NormalizeError::MissingId { kind })?;
        if !roots.contains(&id) {
            roots.push(id);
        }
    }
    Ok(walker.finish(roots))
}

struct Walker<'s> {
    schema: &'s Schema,
    /// Entities on the current recursion path; re-entering one is a cycle.
    in_progress: HashSet<(EntityType, EntityId)>,
    emitted: HashMap<(EntityType, EntityId), usize>,
    records: Vec<Entity>,
}

impl<'s> Walker<'s> {
    fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            in_progress: HashSet::new(),
            emitted: HashMap::new(),
            records: Vec::new(),
        }
    }

    fn finish(self, roots: Vec<EntityId>) -> Normalized {
        Normalized {
            roots,
            records: self.records,
        }
    }

    /// Top-level entities must be full objects; a bare id carries no record.
    fn visit_root(&mut self, kind: EntityType, value: &Value) -> Result<Value, NormalizeError> {
        match value {
            Value::Object(object) => self.visit_object(kind, object),
            other => Err(NormalizeError::UnexpectedShape {
                kind,
                expected: "an object",
                found: shape(other),
            }),
        }
    }

    /// Returns the reference value that replaces `value` in its parent.
    fn visit(&mut self, kind: EntityType, value: &Value) -> Result<Value, NormalizeError> {
        match value {
            Value::Object(object) => self.visit_object(kind, object),
            // Already a reference (a partially normalized payload).
            scalar if EntityId::from_value(scalar).is_some() => Ok(scalar.clone()),
            other => Err(NormalizeError::UnexpectedShape {
                kind,
                expected: "an object",
                found: shape(other),
            }),
        }
    }

    fn visit_object(
        &mut self,
        kind: EntityType,
        object: &Map<String, Value>,
    ) -> Result<Value, NormalizeError> {
        let id_value = object
            .get("id")
            .filter(|v| EntityId::from_value(v).is_some())
            .cloned()
            .ok_or(NormalizeError::MissingId { kind })?;
        let id = EntityId::from_value(&id_value).ok_or(NormalizeError::MissingId { kind })?;

        let key = (kind, id.clone());
        if !self.in_progress.insert(key.clone()) {
            trace!(%kind, %id, "cyclic embedding; emitting reference");
            return Ok(id_value);
        }
        let flat = self.flatten(kind, object);
        self.in_progress.remove(&key);
        let flat = flat?;

        match self.emitted.get(&key) {
            Some(&index) => {
                trace!(%kind, %id, "repeated in this pass; merging attributes");
                let mut attrs = self.records[index].attrs().clone();
                attrs.extend(flat);
                self.records[index] = Entity::new(kind, id, attrs);
            }
            None => {
                self.emitted.insert(key, self.records.len());
                self.records.push(Entity::new(kind, id, flat));
            }
        }
        Ok(id_value)
    }

    fn flatten(
        &mut self,
        kind: EntityType,
        object: &Map<String, Value>,
    ) -> Result<Map<String, Value>, NormalizeError> {
        let schema = self.schema;
        let mut flat = Map::with_capacity(object.len());
        for (key, attr) in object {
            let Some(relation) = schema.relation(kind, key) else {
                flat.insert(key.clone(), attr.clone());
                continue;
            };
            let target = relation.target;
            let replaced = match (relation.cardinality, attr) {
                (_, Value::Null) => Value::Null,
                (Cardinality::Many, Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .map(|item| self.visit(target, item))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                (Cardinality::Many, other) => {
                    return Err(NormalizeError::ExpectedList {
                        kind,
                        field: key.clone(),
                        found: shape(other),
                    })
                }
                (Cardinality::One, item) => self.visit(target, item)?,
            };
            flat.insert(key.clone(), replaced);
        }
        Ok(flat)
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
