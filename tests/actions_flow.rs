use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use sourcepods_cache::gateway::{Credentials, EntityKey, Gateway, GatewayError};
use sourcepods_cache::{Actions, CacheError, EntityId, EntityType, PayloadSource, Store};

struct Scripted {
    delay_ms: u64,
    outcome: Result<Value, GatewayError>,
}

#[derive(Clone, Default)]
struct ScriptedGateway {
    scripts: Arc<Mutex<HashMap<String, VecDeque<Scripted>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGateway {
    async fn respond(&self, call: &str, outcome: Result<Value, GatewayError>) {
        self.respond_after(call, 0, outcome).await;
    }

    async fn respond_after(&self, call: &str, delay_ms: u64, outcome: Result<Value, GatewayError>) {
        self.scripts
            .lock()
            .await
            .entry(call.to_string())
            .or_default()
            .push_back(Scripted { delay_ms, outcome });
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn next(&self, call: String) -> Result<Value, GatewayError> {
        self.calls.lock().await.push(call.clone());
        let scripted = self
            .scripts
            .lock()
            .await
            .get_mut(&call)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Scripted { delay_ms, outcome }) => {
                if delay_ms > 0 {
                    sleep(Duration::from_millis(delay_ms)).await;
                }
                outcome
            }
            None => Err(GatewayError::Transport(format!("no script for {call}"))),
        }
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn source(&self) -> PayloadSource {
        PayloadSource::Rest
    }

    async fn fetch_all(&self, kind: EntityType) -> Result<Value, GatewayError> {
        self.next(format!("fetch_all:{kind}")).await
    }

    async fn fetch_one(&self, kind: EntityType, key: &EntityKey) -> Result<Value, GatewayError> {
        self.next(format!("fetch_one:{kind}:{key}")).await
    }

    async fn fetch_authenticated(&self) -> Result<Value, GatewayError> {
        self.next("fetch_authenticated".into()).await
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Value, GatewayError> {
        self.next(format!("authenticate:{}", credentials.email)).await
    }

    async fn fetch_owned(&self, owner: &str) -> Result<Value, GatewayError> {
        self.next(format!("fetch_owned:{owner}")).await
    }

    async fn create(&self, kind: EntityType, _body: &Value) -> Result<Value, GatewayError> {
        self.next(format!("create:{kind}")).await
    }

    async fn update(
        &self,
        kind: EntityType,
        key: &EntityKey,
        _patch: &Value,
    ) -> Result<Value, GatewayError> {
        let id = key.id.as_ref().map(EntityId::to_string).unwrap_or_default();
        self.next(format!("update:{kind}:{key}:{id}")).await
    }

    async fn delete(&self, kind: EntityType, key: &EntityKey) -> Result<(), GatewayError> {
        self.next(format!("delete:{kind}:{key}")).await.map(|_| ())
    }
}

fn actions(gateway: &ScriptedGateway) -> Actions<ScriptedGateway> {
    Actions::new(gateway.clone(), Store::default())
}

fn server_error() -> GatewayError {
    GatewayError::Status {
        status: 500,
        body: "boom".into(),
    }
}

#[tokio::test]
async fn fetch_one_normalizes_embedded_repositories() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_one:user:bob",
            Ok(json!({"id": 1, "username": "bob", "repositories": [{"id": 9, "name": "r1"}]})),
        )
        .await;
    let actions = actions(&gateway);

    let user = actions.fetch_one(EntityType::User, "bob").await.unwrap();
    assert_eq!(user.to_value(), json!({"id": 1, "username": "bob", "repositories": [9]}));

    let repos = actions.read(|q| q.related_to(EntityType::User, user.id(), "repositories"));
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].to_value(), json!({"id": 9, "name": "r1"}));
}

#[tokio::test]
async fn list_fetch_does_not_erase_detail_fields() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_one:user:bob",
            Ok(json!({"id": 1, "username": "bob", "email": "bob@x"})),
        )
        .await;
    gateway
        .respond("fetch_all:user", Ok(json!([{"id": 1, "username": "bob", "name": "Bob"}])))
        .await;
    let actions = actions(&gateway);

    actions.fetch_one(EntityType::User, "bob").await.unwrap();
    let listing = actions.fetch_all(EntityType::User).await.unwrap();
    assert_eq!(
        listing[0].to_value(),
        json!({"id": 1, "username": "bob", "email": "bob@x", "name": "Bob"})
    );
}

#[tokio::test]
async fn fetch_authenticated_sets_current_user() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond("fetch_authenticated", Ok(json!({"id": "u1", "username": "bob"})))
        .await;
    let actions = actions(&gateway);

    assert!(actions.read(|q| q.current_user()).is_none());
    let me = actions.fetch_authenticated().await.unwrap();
    let current = actions.read(|q| q.current_user()).unwrap();
    assert_eq!(current, me);
}

#[tokio::test]
async fn authenticate_sets_current_user() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond("authenticate:bob@x", Ok(json!({"id": "u1", "username": "bob"})))
        .await;
    let actions = actions(&gateway);

    let credentials = Credentials {
        email: "bob@x".into(),
        password: "secret".into(),
    };
    actions.authenticate(&credentials).await.unwrap();
    let current = actions.read(|q| q.current_user()).unwrap();
    assert_eq!(current.id(), &EntityId::new("u1"));
}

#[tokio::test]
async fn failed_authentication_leaves_pointer_unset() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "authenticate:bob@x",
            Err(GatewayError::Status {
                status: 401,
                body: r#"{"message":"Bad credentials"}"#.into(),
            }),
        )
        .await;
    let actions = actions(&gateway);

    let credentials = Credentials {
        email: "bob@x".into(),
        password: "wrong".into(),
    };
    let err = actions.authenticate(&credentials).await.unwrap_err();
    assert!(err.is_network());
    assert!(actions.read(|q| q.current_user()).is_none());
}

#[tokio::test]
async fn failed_update_leaves_record_unchanged() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_one:user:bob",
            Ok(json!({"id": 1, "username": "bob", "name": "Bob", "email": "bob@x"})),
        )
        .await;
    gateway.respond("update:user:bob:1", Err(server_error())).await;
    let actions = actions(&gateway);

    actions.fetch_one(EntityType::User, "bob").await.unwrap();
    let before = actions.read(|q| q.by_id(EntityType::User, &EntityId::new("1")));

    let err = actions
        .update(EntityType::User, "bob", &json!({"name": "Robert"}))
        .await
        .unwrap_err();
    assert!(err.is_network());

    let after = actions.read(|q| q.by_id(EntityType::User, &EntityId::new("1")));
    assert_eq!(before, after);
    assert_eq!(
        serde_json::to_vec(&after.unwrap().to_value()).unwrap(),
        serde_json::to_vec(&before.unwrap().to_value()).unwrap()
    );
}

#[tokio::test]
async fn successful_update_merges_canonical_record() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_one:user:bob",
            Ok(json!({"id": 1, "username": "bob", "name": "Bob", "email": "bob@x"})),
        )
        .await;
    gateway
        .respond(
            "update:user:bob:1",
            Ok(json!({"id": 1, "username": "bob", "name": "Robert"})),
        )
        .await;
    let actions = actions(&gateway);

    actions.fetch_one(EntityType::User, "bob").await.unwrap();
    let updated = actions
        .update(EntityType::User, "bob", &json!({"name": "Robert"}))
        .await
        .unwrap();
    assert_eq!(updated.get_str("name").as_deref(), Some("Robert"));
    assert_eq!(updated.get_str("email").as_deref(), Some("bob@x"));
}

#[tokio::test]
async fn delete_resynchronizes_listing_exactly_once() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_all:user",
            Ok(json!([{"id": 1, "username": "bob"}, {"id": 2, "username": "ann"}])),
        )
        .await;
    gateway.respond("delete:user:bob", Ok(Value::Null)).await;
    gateway
        .respond("fetch_all:user", Ok(json!([{"id": 2, "username": "ann"}])))
        .await;
    let actions = actions(&gateway);

    actions.fetch_all(EntityType::User).await.unwrap();
    let listing = actions.delete(EntityType::User, "bob").await.unwrap();

    let refetches = gateway
        .calls()
        .await
        .into_iter()
        .skip_while(|call| !call.starts_with("delete"))
        .filter(|call| call == "fetch_all:user")
        .count();
    assert_eq!(refetches, 1);
    assert!(listing
        .iter()
        .all(|user| user.get_str("username").as_deref() != Some("bob")));
    assert!(actions.read(|q| q.user_by_username("bob")).is_none());
    assert!(actions.read(|q| q.user_by_username("ann")).is_some());
}

#[tokio::test]
async fn failed_delete_does_not_refetch_or_mutate() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond("fetch_all:user", Ok(json!([{"id": 1, "username": "bob"}])))
        .await;
    gateway.respond("delete:user:bob", Err(server_error())).await;
    let actions = actions(&gateway);

    actions.fetch_all(EntityType::User).await.unwrap();
    assert!(actions.delete(EntityType::User, "bob").await.is_err());
    assert_eq!(
        gateway.calls().await,
        vec!["fetch_all:user".to_string(), "delete:user:bob".to_string()]
    );
    assert!(actions.read(|q| q.user_by_username("bob")).is_some());
}

#[tokio::test]
async fn deleting_the_current_user_leaves_a_dangling_pointer() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond("fetch_authenticated", Ok(json!({"id": 1, "username": "bob"})))
        .await;
    gateway.respond("delete:user:bob", Ok(Value::Null)).await;
    gateway.respond("fetch_all:user", Ok(json!([]))).await;
    let actions = actions(&gateway);

    actions.fetch_authenticated().await.unwrap();
    actions.delete(EntityType::User, "bob").await.unwrap();

    assert!(actions.read(|q| q.current_user()).is_none());
}

#[tokio::test]
async fn not_found_is_surfaced() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_one:user:ghost",
            Err(GatewayError::NotFound {
                kind: EntityType::User,
                key: "ghost".into(),
            }),
        )
        .await;
    gateway.respond("fetch_one:user:null", Ok(Value::Null)).await;
    let actions = actions(&gateway);

    assert!(actions
        .fetch_one(EntityType::User, "ghost")
        .await
        .unwrap_err()
        .is_not_found());
    assert!(actions
        .fetch_one(EntityType::User, "null")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn malformed_payload_mutates_nothing() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_all:user",
            Ok(json!([{"id": 1, "username": "bob"}, {"username": "no-id"}])),
        )
        .await;
    let actions = actions(&gateway);

    let err = actions.fetch_all(EntityType::User).await.unwrap_err();
    assert!(matches!(err, CacheError::Normalize(_)));
    assert!(actions.read(|q| q.all(EntityType::User)).is_empty());
}

#[tokio::test]
async fn fetch_owned_links_repositories_through_owner() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond(
            "fetch_owned:bob",
            Ok(json!([
                {"id": 9, "name": "r1", "owner": {"id": 1, "username": "bob"}},
                {"id": 10, "name": "r2", "owner": {"id": 1, "username": "bob"}}
            ])),
        )
        .await;
    let actions = actions(&gateway);

    let repos = actions.fetch_owned("bob").await.unwrap();
    assert_eq!(repos.len(), 2);
    let owned = actions.read(|q| {
        let bob = q.user_by_username("bob").unwrap();
        q.related_to(EntityType::User, bob.id(), "repositories")
    });
    assert_eq!(owned.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_of_disjoint_ids_union() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond_after("fetch_one:user:bob", 50, Ok(json!({"id": 1, "username": "bob"})))
        .await;
    gateway
        .respond_after("fetch_one:user:ann", 10, Ok(json!({"id": 2, "username": "ann"})))
        .await;
    let actions = actions(&gateway);

    let (bob, ann) = tokio::join!(
        actions.fetch_one(EntityType::User, "bob"),
        actions.fetch_one(EntityType::User, "ann")
    );
    bob.unwrap();
    ann.unwrap();
    assert_eq!(actions.read(|q| q.all(EntityType::User)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn slower_older_fetch_wins_by_completion_time() {
    let gateway = ScriptedGateway::default();
    // Issued first, completes last with stale data.
    gateway
        .respond_after("fetch_one:user:bob", 50, Ok(json!({"id": 1, "username": "bob", "name": "old"})))
        .await;
    gateway
        .respond_after("fetch_one:user:bob", 10, Ok(json!({"id": 1, "username": "bob", "name": "new"})))
        .await;
    let actions = actions(&gateway);

    let (first, second) = tokio::join!(
        actions.fetch_one(EntityType::User, "bob"),
        actions.fetch_one(EntityType::User, "bob")
    );
    assert_eq!(first.unwrap().get_str("name").as_deref(), Some("old"));
    assert_eq!(second.unwrap().get_str("name").as_deref(), Some("new"));

    let cached = actions.read(|q| q.user_by_username("bob")).unwrap();
    assert_eq!(cached.get_str("name").as_deref(), Some("old"));
}

#[tokio::test]
async fn create_caches_the_returned_record() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond("create:user", Ok(json!({"id": 7, "username": "eve", "email": "eve@x"})))
        .await;
    let actions = actions(&gateway);

    let created = actions
        .create(EntityType::User, &json!({"username": "eve", "email": "eve@x"}))
        .await
        .unwrap();
    assert_eq!(created.id(), &EntityId::new("7"));
    assert_eq!(actions.read(|q| q.user_by_username("eve")), Some(created));
}

#[tokio::test]
async fn bare_id_response_is_rejected_without_touching_the_cache() {
    let gateway = ScriptedGateway::default();
    gateway
        .respond("fetch_one:user:bob", Ok(json!({"id": 1, "username": "bob", "name": "Bob"})))
        .await;
    gateway.respond("fetch_one:user:bob", Ok(json!(1))).await;
    gateway.respond("fetch_authenticated", Ok(json!(1))).await;
    let actions = actions(&gateway);

    actions.fetch_one(EntityType::User, "bob").await.unwrap();
    let err = actions.fetch_one(EntityType::User, "bob").await.unwrap_err();
    assert!(matches!(err, CacheError::Normalize(_)));

    let err = actions.fetch_authenticated().await.unwrap_err();
    assert!(matches!(err, CacheError::Normalize(_)));
    assert!(actions.read(|q| q.current_user()).is_none());
}
