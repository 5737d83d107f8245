//! Action orchestrator: sequences gateway call → normalize → merge → table.
//!
//! This is the only write path into the store. Each action awaits its
//! gateway call first and then commits synchronously, so a failure at any
//! step leaves the store untouched and concurrent actions interleave only
//! between whole commits.
//!
//! Completions land in completion order: when two fetches of the same id
//! race, the one that finishes last wins, even if it was issued first.

use serde_json::Value;
use std::cell::RefCell;
use tracing::{info, instrument, warn};

use crate::error::CacheError;
use crate::gateway::{Credentials, EntityKey, Gateway};
use crate::model::{Entity, EntityId, EntityType};
use crate::normalize::{normalize, normalize_list, Normalized};
use crate::query::Query;
use crate::schema::Schema;
use crate::store::Store;

pub type CacheResult<T> = Result<T, CacheError>;

pub struct Actions<G> {
    gateway: G,
    schema: &'static Schema,
    store: RefCell<Store>,
}

impl<G: Gateway> Actions<G> {
    /// Wires a gateway to a store, using the schema of the gateway's
    /// payload source.
    pub fn new(gateway: G, store: Store) -> Self {
        let schema = Schema::for_source(gateway.source());
        Self {
            gateway,
            schema,
            store: RefCell::new(store),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Read-only access for the presentation layer.
    pub fn read<R>(&self, f: impl FnOnce(Query<'_>) -> R) -> R {
        let store = self.store.borrow();
        f(Query::new(&store, self.schema))
    }

    #[instrument(skip_all, fields(%kind))]
    pub async fn fetch_all(&self, kind: EntityType) -> CacheResult<Vec<Entity>> {
        let payload = self.gateway.fetch_all(kind).await?;
        let normalized = normalize_list(self.schema, kind, &payload)?;
        self.commit_listing(kind, normalized)
    }

    #[instrument(skip_all, fields(%kind, key = %key))]
    pub async fn fetch_one(&self, kind: EntityType, key: &str) -> CacheResult<Entity> {
        let target = self.entity_key(kind, key);
        let payload = self.gateway.fetch_one(kind, &target).await?;
        self.commit_single(kind, key, payload)
    }

    /// Fetches the session's user and points the auth pointer at it.
    ///
    /// The upsert and the pointer update are two steps: a reader in between
    /// sees the user cached but not yet current.
    #[instrument(skip_all)]
    pub async fn fetch_authenticated(&self) -> CacheResult<Entity> {
        let payload = self.gateway.fetch_authenticated().await?;
        let user = self.commit_single(EntityType::User, "me", payload)?;
        self.store
            .borrow_mut()
            .set_authenticated(user.id().clone());
        info!(id = %user.id(), "authenticated user loaded");
        Ok(user)
    }

    #[instrument(skip_all, fields(email = %credentials.email))]
    pub async fn authenticate(&self, credentials: &Credentials) -> CacheResult<Entity> {
        let payload = self.gateway.authenticate(credentials).await?;
        let user = self.commit_single(EntityType::User, &credentials.email, payload)?;
        self.store
            .borrow_mut()
            .set_authenticated(user.id().clone());
        info!(id = %user.id(), "signed in");
        Ok(user)
    }

    #[instrument(skip_all, fields(owner = %owner))]
    pub async fn fetch_owned(&self, owner: &str) -> CacheResult<Vec<Entity>> {
        let payload = self.gateway.fetch_owned(owner).await?;
        let normalized = normalize_list(self.schema, EntityType::Repository, &payload)?;
        self.commit_listing(EntityType::Repository, normalized)
    }

    #[instrument(skip_all, fields(%kind))]
    pub async fn create(&self, kind: EntityType, body: &Value) -> CacheResult<Entity> {
        let payload = self.gateway.create(kind, body).await?;
        self.commit_single(kind, "new", payload)
    }

    /// Sends `patch` and merges the canonical record the server returns.
    /// A failed call mutates nothing.
    #[instrument(skip_all, fields(%kind, key = %key))]
    pub async fn update(&self, kind: EntityType, key: &str, patch: &Value) -> CacheResult<Entity> {
        let target = self.entity_key(kind, key);
        let payload = match self.gateway.update(kind, &target, patch).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "update failed; cache untouched");
                return Err(err.into());
            }
        };
        self.commit_single(kind, key, payload)
    }

    /// Deletes remotely, then resynchronizes the whole listing instead of
    /// splicing the cache locally. Returns the fresh listing.
    #[instrument(skip_all, fields(%kind, key = %key))]
    pub async fn delete(&self, kind: EntityType, key: &str) -> CacheResult<Vec<Entity>> {
        let target = self.entity_key(kind, key);
        self.gateway.delete(kind, &target).await?;
        info!("deleted remotely; resynchronizing listing");
        self.resync(kind).await
    }

    /// `fetch_all` that also evicts cached records missing from the listing.
    #[instrument(skip_all, fields(%kind))]
    pub async fn resync(&self, kind: EntityType) -> CacheResult<Vec<Entity>> {
        let payload = self.gateway.fetch_all(kind).await?;
        let normalized = normalize_list(self.schema, kind, &payload)?;
        let listed = normalized.roots().to_vec();
        let listing = self.commit_listing(kind, normalized)?;
        let evicted = self.store.borrow_mut().evict_unlisted(kind, &listed);
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted records missing from listing");
        }
        Ok(listing)
    }

    fn entity_key(&self, kind: EntityType, key: &str) -> EntityKey {
        let id = self.read(|query| query.resolve_key(kind, key).map(|e| e.id().clone()));
        EntityKey::new(key).with_id(id)
    }

    fn commit_single(&self, kind: EntityType, key: &str, payload: Value) -> CacheResult<Entity> {
        if payload.is_null() {
            return Err(CacheError::NotFound {
                kind,
                key: key.to_string(),
            });
        }
        let normalized = normalize(self.schema, kind, &payload)?;
        let root = normalized.roots()[0].clone();
        self.commit(normalized)?;
        self.snapshot(kind, &root, key)
    }

    fn commit_listing(&self, kind: EntityType, normalized: Normalized) -> CacheResult<Vec<Entity>> {
        let roots = normalized.roots().to_vec();
        self.commit(normalized)?;
        let store = self.store.borrow();
        Ok(roots
            .iter()
            .filter_map(|id| store.get(kind, id).cloned())
            .collect())
    }

    fn commit(&self, normalized: Normalized) -> CacheResult<usize> {
        let count = self.store.borrow_mut().apply(normalized.into_records())?;
        Ok(count)
    }

    fn snapshot(&self, kind: EntityType, id: &EntityId, key: &str) -> CacheResult<Entity> {
        self.store
            .borrow()
            .get(kind, id)
            .cloned()
            .ok_or_else(|| CacheError::NotFound {
                kind,
                key: key.to_string(),
            })
    }
}
