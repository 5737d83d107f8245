use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::fmt;
use tracing::debug;

use super::{
    read_json, request_id, Credentials, EntityKey, Gateway, GatewayError, HttpSettings,
    REQUEST_ID_HEADER,
};
use crate::model::EntityType;
use crate::schema::PayloadSource;

/// JSON-over-HTTP gateway for the `users` / `user` / `authorize` routes.
#[derive(Clone)]
pub struct RestGateway {
    http: Client,
    settings: HttpSettings,
}

impl fmt::Debug for RestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestGateway")
            .field("base_url", &self.settings.base_url)
            .finish_non_exhaustive()
    }
}

impl RestGateway {
    pub fn new(settings: HttpSettings) -> Result<Self, GatewayError> {
        let http = settings.build_client()?;
        Ok(Self { http, settings })
    }

    pub fn base_url(&self) -> &Url {
        &self.settings.base_url
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, GatewayError> {
        let url = self.settings.join(path)?;
        let mut builder = self
            .http
            .request(method, url)
            .header(REQUEST_ID_HEADER, request_id());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().map_err(GatewayError::from)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        kind: EntityType,
        key: &str,
    ) -> Result<Value, GatewayError> {
        let request = self.build_request(method, path, body)?;
        debug!(method = %request.method(), url = %request.url(), "sending api request");
        let response = self.http.execute(request).await?;
        debug!(status = %response.status(), "api response");
        read_json(response, kind, key).await
    }

    fn unsupported(operation: &'static str) -> GatewayError {
        GatewayError::Unsupported {
            operation,
            via: PayloadSource::Rest,
        }
    }
}

/// Route of a single entity, e.g. `users/bob`.
pub fn entity_path(kind: EntityType, key: &EntityKey) -> Result<String, GatewayError> {
    match kind {
        EntityType::User => {
            let segments = key.segments(kind)?;
            Ok(format!("users/{}", segments[0]))
        }
        EntityType::Repository => Err(RestGateway::unsupported("repository lookup")),
    }
}

#[async_trait]
impl Gateway for RestGateway {
    fn source(&self) -> PayloadSource {
        PayloadSource::Rest
    }

    async fn fetch_all(&self, kind: EntityType) -> Result<Value, GatewayError> {
        match kind {
            EntityType::User => self.send(Method::GET, "users", None, kind, "*").await,
            EntityType::Repository => Err(Self::unsupported("repository listing")),
        }
    }

    async fn fetch_one(&self, kind: EntityType, key: &EntityKey) -> Result<Value, GatewayError> {
        let path = entity_path(kind, key)?;
        self.send(Method::GET, &path, None, kind, &key.key).await
    }

    async fn fetch_authenticated(&self) -> Result<Value, GatewayError> {
        self.send(Method::GET, "user", None, EntityType::User, "me")
            .await
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Value, GatewayError> {
        let body = serde_json::to_value(credentials)
            .map_err(|err| GatewayError::Decode(err.to_string()))?;
        self.send(
            Method::POST,
            "authorize",
            Some(&body),
            EntityType::User,
            &credentials.email,
        )
        .await
    }

    async fn fetch_owned(&self, owner: &str) -> Result<Value, GatewayError> {
        let key = EntityKey::new(owner);
        let segments = key.segments(EntityType::User)?;
        let path = format!("users/{}/repositories", segments[0]);
        self.send(Method::GET, &path, None, EntityType::User, owner)
            .await
    }

    async fn create(&self, kind: EntityType, body: &Value) -> Result<Value, GatewayError> {
        match kind {
            EntityType::User => {
                self.send(Method::POST, "users", Some(body), kind, "new")
                    .await
            }
            EntityType::Repository => Err(Self::unsupported("repository creation")),
        }
    }

    async fn update(
        &self,
        kind: EntityType,
        key: &EntityKey,
        patch: &Value,
    ) -> Result<Value, GatewayError> {
        let path = entity_path(kind, key)?;
        self.send(Method::PUT, &path, Some(patch), kind, &key.key)
            .await
    }

    async fn delete(&self, kind: EntityType, key: &EntityKey) -> Result<(), GatewayError> {
        let path = entity_path(kind, key)?;
        self.send(Method::DELETE, &path, None, kind, &key.key)
            .await
            .map(|_| ())
    }
}
