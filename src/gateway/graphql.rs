use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

use super::{
    read_json, request_id, Credentials, EntityKey, Gateway, GatewayError, HttpSettings,
    REQUEST_ID_HEADER,
};
use crate::model::{EntityId, EntityType};
use crate::schema::PayloadSource;

const USER_FIELDS: &str = "id email username name created_at updated_at";
const REPOSITORY_FIELDS: &str = "id name description website default_branch private bare \
     created_at updated_at stars forks \
     issue_stats { total open closed } pull_request_stats { total open closed }";

/// Documents issued against the `query` endpoint.
pub mod documents {
    use super::{REPOSITORY_FIELDS, USER_FIELDS};

    pub fn users() -> String {
        format!("query {{ users {{ {USER_FIELDS} }} }}")
    }

    pub fn user() -> String {
        format!(
            "query ($username: String!) {{ user(username: $username) {{ {USER_FIELDS} \
             repositories {{ {REPOSITORY_FIELDS} }} }} }}"
        )
    }

    pub fn me() -> String {
        format!("query {{ me {{ {USER_FIELDS} }} }}")
    }

    pub fn repositories() -> String {
        format!(
            "query ($owner: String!) {{ repositories(owner: $owner) {{ {REPOSITORY_FIELDS} \
             owner {{ {USER_FIELDS} }} }} }}"
        )
    }

    pub fn repository() -> String {
        format!(
            "query ($owner: String!, $name: String!) {{ repository(owner: $owner, name: $name) \
             {{ {REPOSITORY_FIELDS} owner {{ {USER_FIELDS} }} }} }}"
        )
    }

    pub fn update_user() -> String {
        format!(
            "mutation ($id: ID!, $user: updatedUser!) {{ updateUser(id: $id, user: $user) \
             {{ {USER_FIELDS} }} }}"
        )
    }

    pub fn create_repository() -> String {
        format!(
            "mutation ($repository: newRepository!) {{ createRepository(repository: $repository) \
             {{ {REPOSITORY_FIELDS} owner {{ {USER_FIELDS} }} }} }}"
        )
    }
}

/// GraphQL gateway. Login still goes through the REST `authorize` route,
/// which is the only session endpoint the API offers.
#[derive(Clone)]
pub struct GraphqlGateway {
    http: Client,
    settings: HttpSettings,
    endpoint: Url,
}

impl fmt::Debug for GraphqlGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphqlGateway")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GraphqlGateway {
    pub fn new(settings: HttpSettings) -> Result<Self, GatewayError> {
        let http = settings.build_client()?;
        let endpoint = settings.join("query")?;
        Ok(Self {
            http,
            settings,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn build_request(
        &self,
        document: &str,
        variables: Value,
    ) -> Result<reqwest::Request, GatewayError> {
        self.http
            .post(self.endpoint.clone())
            .header(REQUEST_ID_HEADER, request_id())
            .json(&json!({ "query": document, "variables": variables }))
            .build()
            .map_err(GatewayError::from)
    }

    /// Runs `document` and returns `data.<field>`; `None` when it is null.
    async fn run(
        &self,
        document: &str,
        variables: Value,
        field: &str,
        kind: EntityType,
        key: &str,
    ) -> Result<Option<Value>, GatewayError> {
        let request = self.build_request(document, variables)?;
        debug!(url = %request.url(), field, "sending graphql request");
        let response = self.http.execute(request).await?;
        let body = read_json(response, kind, key).await?;
        unwrap_response(body, field)
    }

    async fn run_required(
        &self,
        document: &str,
        variables: Value,
        field: &str,
        kind: EntityType,
        key: &str,
    ) -> Result<Value, GatewayError> {
        self.run(document, variables, field, kind, key)
            .await?
            .ok_or_else(|| GatewayError::NotFound {
                kind,
                key: key.to_string(),
            })
    }

    async fn user_id(&self, username: &str) -> Result<EntityId, GatewayError> {
        let user = self
            .run_required(
                &documents::user(),
                json!({ "username": username }),
                "user",
                EntityType::User,
                username,
            )
            .await?;
        user.get("id")
            .and_then(EntityId::from_value)
            .ok_or_else(|| GatewayError::Decode(format!("user `{username}` has no id")))
    }

    fn unsupported(operation: &'static str) -> GatewayError {
        GatewayError::Unsupported {
            operation,
            via: PayloadSource::Graphql,
        }
    }
}

/// Extracts `data.<field>` from a GraphQL response. A non-empty `errors`
/// array fails the call even when data is present.
pub fn unwrap_response(mut body: Value, field: &str) -> Result<Option<Value>, GatewayError> {
    if let Some(errors) = body.get("errors").and_then(Value::as_array) {
        if !errors.is_empty() {
            let messages = errors
                .iter()
                .map(|error| {
                    error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string())
                })
                .collect();
            return Err(GatewayError::Graphql(messages));
        }
    }
    let data = body
        .get_mut("data")
        .filter(|data| data.is_object())
        .ok_or_else(|| GatewayError::Decode("response has no `data` object".into()))?;
    match data.get_mut(field).map(Value::take) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(value)),
    }
}

#[async_trait]
impl Gateway for GraphqlGateway {
    fn source(&self) -> PayloadSource {
        PayloadSource::Graphql
    }

    async fn fetch_all(&self, kind: EntityType) -> Result<Value, GatewayError> {
        match kind {
            EntityType::User => Ok(self
                .run(&documents::users(), json!({}), "users", kind, "*")
                .await?
                .unwrap_or(Value::Array(Vec::new()))),
            // `repositories` always needs an owner; see `fetch_owned`.
            EntityType::Repository => Err(Self::unsupported("repository listing")),
        }
    }

    async fn fetch_one(&self, kind: EntityType, key: &EntityKey) -> Result<Value, GatewayError> {
        let segments = key.segments(kind)?;
        match kind {
            EntityType::User => {
                self.run_required(
                    &documents::user(),
                    json!({ "username": segments[0] }),
                    "user",
                    kind,
                    &key.key,
                )
                .await
            }
            EntityType::Repository => {
                self.run_required(
                    &documents::repository(),
                    json!({ "owner": segments[0], "name": segments[1] }),
                    "repository",
                    kind,
                    &key.key,
                )
                .await
            }
        }
    }

    async fn fetch_authenticated(&self) -> Result<Value, GatewayError> {
        self.run_required(&documents::me(), json!({}), "me", EntityType::User, "me")
            .await
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Value, GatewayError> {
        let url = self.settings.join("authorize")?;
        let request = self
            .http
            .post(url)
            .header(REQUEST_ID_HEADER, request_id())
            .json(credentials)
            .build()?;
        let response = self.http.execute(request).await?;
        read_json(response, EntityType::User, &credentials.email).await
    }

    async fn fetch_owned(&self, owner: &str) -> Result<Value, GatewayError> {
        let key = EntityKey::new(owner);
        key.segments(EntityType::User)?;
        Ok(self
            .run(
                &documents::repositories(),
                json!({ "owner": owner }),
                "repositories",
                EntityType::User,
                owner,
            )
            .await?
            .unwrap_or(Value::Array(Vec::new())))
    }

    async fn create(&self, kind: EntityType, body: &Value) -> Result<Value, GatewayError> {
        match kind {
            EntityType::Repository => {
                self.run_required(
                    &documents::create_repository(),
                    json!({ "repository": body }),
                    "createRepository",
                    kind,
                    "new",
                )
                .await
            }
            EntityType::User => Err(Self::unsupported("user creation")),
        }
    }

    async fn update(
        &self,
        kind: EntityType,
        key: &EntityKey,
        patch: &Value,
    ) -> Result<Value, GatewayError> {
        if kind != EntityType::User {
            return Err(Self::unsupported("repository update"));
        }
        let segments = key.segments(kind)?;
        let id = match &key.id {
            Some(id) => id.clone(),
            None => self.user_id(segments[0]).await?,
        };
        self.run_required(
            &documents::update_user(),
            json!({ "id": id, "user": patch }),
            "updateUser",
            kind,
            &key.key,
        )
        .await
    }

    async fn delete(&self, _kind: EntityType, _key: &EntityKey) -> Result<(), GatewayError> {
        Err(Self::unsupported("deletion"))
    }
}
