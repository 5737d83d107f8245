use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Repository,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::User, EntityType::Repository];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Repository => "repository",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(EntityType::User),
            "repository" | "repositories" | "repo" => Ok(EntityType::Repository),
            other => Err(format!("unknown entity type `{other}`; expected user|repository")),
        }
    }
}

/// Stable identifier of an entity within its type's table.
///
/// Payloads carry ids either as strings (GraphQL `ID`, uuids) or as integers;
/// both are canonicalized to their string form so lookups agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads an id out of a JSON scalar. Empty strings, floats and
    /// non-scalars are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(Self(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        EntityId::from_value(&value)
            .ok_or_else(|| de::Error::custom(format!("invalid entity id: {value}")))
    }
}

/// What a record says about one of its relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationState {
    /// The key is absent: never fetched, not authoritative.
    Unknown,
    /// The key is present; an empty list means "confirmed empty".
    Loaded(Vec<EntityId>),
}

/// A flat, normalized record: attributes keyed by name, relations held as
/// id references. `attrs` always contains the record's own `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    kind: EntityType,
    id: EntityId,
    attrs: Map<String, Value>,
}

impl Entity {
    pub(crate) fn new(kind: EntityType, id: EntityId, attrs: Map<String, Value>) -> Self {
        Self { kind, id, attrs }
    }

    /// Builds an entity from a flat JSON object carrying an `id`.
    pub fn from_value(kind: EntityType, value: Value) -> Option<Self> {
        match value {
            Value::Object(attrs) => {
                let id = attrs.get("id").and_then(EntityId::from_value)?;
                Some(Self { kind, id, attrs })
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn attrs(&self) -> &Map<String, Value> {
        &self.attrs
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// String form of a scalar attribute, used for natural-key matching.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.attrs.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub(crate) fn into_attrs(self) -> Map<String, Value> {
        self.attrs
    }

    pub fn relation(&self, field: &str) -> RelationState {
        match self.attrs.get(field) {
            None => RelationState::Unknown,
            Some(Value::Null) => RelationState::Loaded(Vec::new()),
            Some(Value::Array(items)) => {
                RelationState::Loaded(items.iter().filter_map(EntityId::from_value).collect())
            }
            Some(single) => RelationState::Loaded(EntityId::from_value(single).into_iter().collect()),
        }
    }

    /// Whether `field` holds a reference to `target`, as a single id or in a list.
    pub fn references(&self, field: &str, target: &EntityId) -> bool {
        match self.relation(field) {
            RelationState::Loaded(ids) => ids.iter().any(|id| id == target),
            RelationState::Unknown => false,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.attrs.clone())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

/// Read view of a cached user.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct User {
    pub id: EntityId,
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "created", deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated", deserialize_with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub repositories: Option<Vec<EntityId>>,
}

/// Read view of a cached repository.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Repository {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub bare: bool,
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub forks: i64,
    #[serde(default, alias = "created", deserialize_with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated", deserialize_with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner: Option<EntityId>,
}

// GraphQL sends unix seconds, REST sends RFC 3339.
fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {n}")))?;
            Utc.timestamp_opt(secs, 0)
                .single()
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {secs}")))
        }
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(de::Error::custom),
        Some(other) => Err(de::Error::custom(format!("invalid timestamp: {other}"))),
    }
}
