//! Remote gateways: the network calls behind every cache action.
//!
//! A gateway returns raw payloads; their shape is the normalizer's input
//! contract for the gateway's `PayloadSource`. Gateways never retry.

pub mod graphql;
pub mod rest;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::model::{EntityId, EntityType};
use crate::schema::PayloadSource;

pub use graphql::GraphqlGateway;
pub use rest::RestGateway;

pub(crate) const USER_AGENT: &str = concat!("sourcepods-cache/", env!("CARGO_PKG_VERSION"));
pub(crate) const SESSION_COOKIE: &str = "_gitpods_session";
pub(crate) const REQUEST_ID_HEADER: &str = "X-Request-ID";

static PATH_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("valid path segment pattern"));

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to reach api: {0}")]
    Transport(String),
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{kind} `{key}` not found")]
    NotFound { kind: EntityType, key: String },
    #[error("graphql errors: {}", .0.join("; "))]
    Graphql(Vec<String>),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid {kind} key `{key}`")]
    InvalidKey { kind: EntityType, key: String },
    #[error("{operation} is not supported over {via}")]
    Unsupported {
        operation: &'static str,
        via: PayloadSource,
    },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// External key of an entity plus its id when the cache already knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey {
    pub key: String,
    pub id: Option<EntityId>,
}

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: Option<EntityId>) -> Self {
        self.id = id;
        self
    }

    /// Splits the key into URL path segments: `username` for users,
    /// `owner/name` for repositories. Every segment must be path-safe.
    pub fn segments(&self, kind: EntityType) -> Result<Vec<&str>, GatewayError> {
        let segments: Vec<&str> = self.key.split('/').collect();
        let expected = match kind {
            EntityType::User => 1,
            EntityType::Repository => 2,
        };
        if segments.len() != expected || !segments.iter().all(|s| PATH_SEGMENT.is_match(s)) {
            return Err(GatewayError::InvalidKey {
                kind,
                key: self.key.clone(),
            });
        }
        Ok(segments)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Payload shape this gateway produces.
    fn source(&self) -> PayloadSource;

    async fn fetch_all(&self, kind: EntityType) -> Result<Value, GatewayError>;

    async fn fetch_one(&self, kind: EntityType, key: &EntityKey) -> Result<Value, GatewayError>;

    async fn fetch_authenticated(&self) -> Result<Value, GatewayError>;

    async fn authenticate(&self, credentials: &Credentials) -> Result<Value, GatewayError>;

    /// Repositories owned by `owner` (a username).
    async fn fetch_owned(&self, owner: &str) -> Result<Value, GatewayError>;

    async fn create(&self, kind: EntityType, body: &Value) -> Result<Value, GatewayError>;

    async fn update(
        &self,
        kind: EntityType,
        key: &EntityKey,
        patch: &Value,
    ) -> Result<Value, GatewayError>;

    async fn delete(&self, kind: EntityType, key: &EntityKey) -> Result<(), GatewayError>;
}

/// Settings shared by the HTTP gateways.
#[derive(Clone)]
pub struct HttpSettings {
    pub base_url: reqwest::Url,
    pub session_cookie: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for HttpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSettings")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpSettings {
    pub fn new(base_url: reqwest::Url) -> Self {
        Self {
            base_url,
            session_cookie: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_provider(self.session_jar())
            .timeout(self.timeout)
            .build()
            .map_err(GatewayError::from)
    }

    /// Cookie jar seeded with the configured session. A `Set-Cookie` from
    /// `authorize` replaces the seeded value for later requests.
    pub(crate) fn session_jar(&self) -> Arc<Jar> {
        let jar = Jar::default();
        if let Some(session) = &self.session_cookie {
            jar.add_cookie_str(&format!("{SESSION_COOKIE}={session}; Path=/"), &self.base_url);
        }
        Arc::new(jar)
    }

    pub(crate) fn join(&self, path: &str) -> Result<reqwest::Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|err| GatewayError::Transport(format!("invalid api url `{path}`: {err}")))
    }
}

pub(crate) fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reads a response body: 404 becomes `NotFound`, any other non-2xx a
/// status error. An empty 2xx body reads as `null`.
pub(crate) async fn read_json(
    response: reqwest::Response,
    kind: EntityType,
    key: &str,
) -> Result<Value, GatewayError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound {
            kind,
            key: key.to_string(),
        });
    }
    let body = response.text().await?;
    if !status.is_success() {
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|err| GatewayError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_keys_are_single_path_segments() {
        assert_eq!(EntityKey::new("bob").segments(EntityType::User).unwrap(), vec!["bob"]);
        assert!(EntityKey::new("bob/x").segments(EntityType::User).is_err());
        assert!(EntityKey::new("../admin").segments(EntityType::User).is_err());
        assert!(EntityKey::new("").segments(EntityType::User).is_err());
    }

    #[test]
    fn repository_keys_are_owner_and_name() {
        assert_eq!(
            EntityKey::new("bob/r1")
                .segments(EntityType::Repository)
                .unwrap(),
            vec!["bob", "r1"]
        );
        assert!(EntityKey::new("r1").segments(EntityType::Repository).is_err());
        assert!(EntityKey::new("bob/r 1").segments(EntityType::Repository).is_err());
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            email: "bob@example.com".into(),
            password: "hunter22".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("bob@example.com"));
        assert!(!rendered.contains("hunter22"));
    }

    #[test]
    fn request_ids_are_unique_uuids() {
        let a = request_id();
        let b = request_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn session_jar_carries_configured_cookie() {
        use reqwest::cookie::CookieStore;

        let base = reqwest::Url::parse("http://localhost:3020/api/").unwrap();
        let mut settings = HttpSettings::new(base.clone());
        assert!(settings.session_jar().cookies(&base).is_none());

        settings.session_cookie = Some("s3cret".into());
        let jar = settings.session_jar();
        let sent = jar.cookies(&base.join("users").unwrap()).unwrap();
        assert_eq!(sent.to_str().unwrap(), "_gitpods_session=s3cret");

        jar.set_cookies(
            &mut [HeaderValue::from_static("_gitpods_session=fresh; Path=/")].iter(),
            &base.join("authorize").unwrap(),
        );
        let sent = jar.cookies(&base).unwrap();
        assert_eq!(sent.to_str().unwrap(), "_gitpods_session=fresh");
    }
}
