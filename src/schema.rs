//! Payload schemas: which attributes of a server payload hold embedded
//! entities, and of what type.
//!
//! One schema exists per payload source. The normalizer is always handed a
//! schema explicitly; it never guesses a payload's shape.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::EntityType;

/// Where payloads come from. Fixed by configuration, never renegotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    Rest,
    Graphql,
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadSource::Rest => f.write_str("rest"),
            PayloadSource::Graphql => f.write_str("graphql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// An attribute that embeds (or references) entities of another type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub field: &'static str,
    pub target: EntityType,
    pub cardinality: Cardinality,
    /// Attribute on the target pointing back at the owner, if any.
    pub inverse: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub kind: EntityType,
    /// Human-meaningful unique attribute (`username` for users).
    pub natural_key: &'static str,
    pub relations: Vec<Relation>,
}

impl EntitySchema {
    pub fn new(kind: EntityType, natural_key: &'static str) -> Self {
        Self {
            kind,
            natural_key,
            relations: Vec::new(),
        }
    }

    pub fn relation(
        mut self,
        field: &'static str,
        target: EntityType,
        cardinality: Cardinality,
        inverse: Option<&'static str>,
    ) -> Self {
        self.relations.push(Relation {
            field,
            target,
            cardinality,
            inverse,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    source: PayloadSource,
    entities: BTreeMap<EntityType, EntitySchema>,
}

static REST_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    // `GET users/{username}` embeds the user's repositories; repository
    // listings embed their owner.
    Schema::new(PayloadSource::Rest)
        .with(
            EntitySchema::new(EntityType::User, "username").relation(
                "repositories",
                EntityType::Repository,
                Cardinality::Many,
                Some("owner"),
            ),
        )
        .with(EntitySchema::new(EntityType::Repository, "name").relation(
            "owner",
            EntityType::User,
            Cardinality::One,
            None,
        ))
});

static GRAPHQL_SCHEMA: Lazy<Schema> = Lazy::new(|| {
    // Mirrors the `User.repositories` / `Repository.owner` edges of the API
    // schema. `issue_stats` and `pull_request_stats` are value objects without
    // ids and stay embedded.
    Schema::new(PayloadSource::Graphql)
        .with(
            EntitySchema::new(EntityType::User, "username").relation(
                "repositories",
                EntityType::Repository,
                Cardinality::Many,
                Some("owner"),
            ),
        )
        .with(EntitySchema::new(EntityType::Repository, "name").relation(
            "owner",
            EntityType::User,
            Cardinality::One,
            None,
        ))
});

impl Schema {
    pub fn new(source: PayloadSource) -> Self {
        Self {
            source,
            entities: BTreeMap::new(),
        }
    }

    pub fn with(mut self, entity: EntitySchema) -> Self {
        self.entities.insert(entity.kind, entity);
        self
    }

    pub fn rest() -> &'static Schema {
        &REST_SCHEMA
    }

    pub fn graphql() -> &'static Schema {
        &GRAPHQL_SCHEMA
    }

    pub fn for_source(source: PayloadSource) -> &'static Schema {
        match source {
            PayloadSource::Rest => Self::rest(),
            PayloadSource::Graphql => Self::graphql(),
        }
    }

    pub fn source(&self) -> PayloadSource {
        self.source
    }

    pub fn entity(&self, kind: EntityType) -> Option<&EntitySchema> {
        self.entities.get(&kind)
    }

    pub fn relation(&self, kind: EntityType, field: &str) -> Option<&Relation> {
        self.entity(kind)?
            .relations
            .iter()
            .find(|relation| relation.field == field)
    }

    pub fn relations(&self, kind: EntityType) -> &[Relation] {
        self.entity(kind)
            .map(|entity| entity.relations.as_slice())
            .unwrap_or(&[])
    }

    pub fn natural_key(&self, kind: EntityType) -> Option<&'static str> {
        self.entity(kind).map(|entity| entity.natural_key)
    }
}
