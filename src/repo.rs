//! In-memory persistence behind reactive adapters.
//!
//! [`Repository`] is the seam between pipelines and storage: every lookup
//! returns a cold [`Maybe`] or [`Flow`], so nothing touches the store until
//! resolution or subscription, and re-subscribing repeats the operation
//! against current state. [`MemoryRepository`] is the bundled backend, a
//! hash map guarded by an async lock with insertion order kept separately
//! so listings are deterministic.

use crate::error::{Failure, RepoError};
use crate::flow::Flow;
use crate::maybe::Maybe;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, age: u32) -> Self {
        Self { id: id.into(), name: name.into(), age, email: None }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Storage capability consumed by transports and pipelines.
///
/// Implementations return cold values; the database work happens when the
/// caller resolves or subscribes, once per resolution.
pub trait Repository: Send + Sync + 'static {
    /// Store a new record. Fails with [`RepoError::DuplicateId`] when the
    /// id is already present.
    fn insert(&self, user: User) -> Maybe<User>;

    /// Store records in order, emitting each as it lands. The sequence
    /// fails on the first rejected record; later records are not attempted.
    fn insert_all(&self, users: Vec<User>) -> Flow<User>;

    /// Look a record up by id; absent resolves empty.
    fn find_by_id(&self, id: &str) -> Maybe<User>;

    /// Insert or replace, keeping the record's original listing position
    /// when it already exists.
    fn save(&self, user: User) -> Maybe<User>;

    /// Remove by id. Resolves present on removal, empty when nothing was
    /// stored under the id.
    fn delete_by_id(&self, id: &str) -> Maybe<()>;

    /// Every record in insertion order. The snapshot is taken when the
    /// subscriber arrives, not when the flow is built.
    fn find_all(&self) -> Flow<User>;

    /// Records whose name matches exactly, in insertion order.
    fn find_by_name(&self, name: &str) -> Flow<User>;
}

#[derive(Debug, Default)]
struct Store {
    users: HashMap<String, User>,
    order: Vec<String>,
}

/// Hash-map backend for [`Repository`]. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<Store>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository seeded with `users`; duplicate ids keep the first.
    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = User>,
    {
        let mut store = Store::default();
        for user in users {
            let id = user.id.clone();
            if store.users.insert(id.clone(), user).is_none() {
                store.order.push(id);
            }
        }
        Self { inner: Arc::new(Mutex::new(store)) }
    }
}

async fn insert_into(inner: &Arc<Mutex<Store>>, user: User) -> Result<User, Failure> {
    let mut store = inner.lock().await;
    if store.users.contains_key(&user.id) {
        return Err(Failure::source(RepoError::DuplicateId(user.id.clone())));
    }
    store.order.push(user.id.clone());
    store.users.insert(user.id.clone(), user.clone());
    Ok(user)
}

impl Repository for MemoryRepository {
    fn insert(&self, user: User) -> Maybe<User> {
        let inner = Arc::clone(&self.inner);
        Maybe::from_async(move || {
            let inner = Arc::clone(&inner);
            let user = user.clone();
            async move { insert_into(&inner, user).await.map(Some) }
        })
    }

    fn insert_all(&self, users: Vec<User>) -> Flow<User> {
        let inner = Arc::clone(&self.inner);
        let users: Arc<[User]> = users.into();
        Flow::from_factory(move || {
            let inner = Arc::clone(&inner);
            let users = Arc::clone(&users);
            stream::unfold(0usize, move |index| {
                let inner = Arc::clone(&inner);
                let users = Arc::clone(&users);
                async move {
                    let user = users.get(index)?.clone();
                    match insert_into(&inner, user).await {
                        Ok(stored) => Some((Ok(stored), index + 1)),
                        // Skip past the end so the failure is the last
                        // signal.
                        Err(failure) => Some((Err(failure), users.len())),
                    }
                }
            })
        })
    }

    fn find_by_id(&self, id: &str) -> Maybe<User> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        Maybe::from_async(move || {
            let inner = Arc::clone(&inner);
            let id = id.clone();
            async move { Ok(inner.lock().await.users.get(&id).cloned()) }
        })
    }

    fn save(&self, user: User) -> Maybe<User> {
        let inner = Arc::clone(&self.inner);
        Maybe::from_async(move || {
            let inner = Arc::clone(&inner);
            let user = user.clone();
            async move {
                let mut store = inner.lock().await;
                if store.users.insert(user.id.clone(), user.clone()).is_none() {
                    store.order.push(user.id.clone());
                }
                Ok(Some(user))
            }
        })
    }

    fn delete_by_id(&self, id: &str) -> Maybe<()> {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        Maybe::from_async(move || {
            let inner = Arc::clone(&inner);
            let id = id.clone();
            async move {
                let mut store = inner.lock().await;
                if store.users.remove(&id).is_none() {
                    return Ok(None);
                }
                store.order.retain(|stored| *stored != id);
                Ok(Some(()))
            }
        })
    }

    fn find_all(&self) -> Flow<User> {
        let inner = Arc::clone(&self.inner);
        Flow::from_factory(move || {
            let inner = Arc::clone(&inner);
            stream::once(async move {
                let store = inner.lock().await;
                let snapshot: Vec<Result<User, Failure>> = store
                    .order
                    .iter()
                    .filter_map(|id| store.users.get(id).cloned())
                    .map(Ok)
                    .collect();
                stream::iter(snapshot)
            })
            .flatten()
        })
    }

    fn find_by_name(&self, name: &str) -> Flow<User> {
        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        Flow::from_factory(move || {
            let inner = Arc::clone(&inner);
            let name = name.clone();
            stream::once(async move {
                let store = inner.lock().await;
                let snapshot: Vec<Result<User, Failure>> = store
                    .order
                    .iter()
                    .filter_map(|id| store.users.get(id))
                    .filter(|user| user.name == name)
                    .cloned()
                    .map(Ok)
                    .collect();
                stream::iter(snapshot)
            })
            .flatten()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("u-1", "alice", 30).with_email("alice@example.com")
    }

    fn bob() -> User {
        User::new("u-2", "bob", 25)
    }

    #[tokio::test]
    async fn insert_then_find_round_trips() {
        let repo = MemoryRepository::new();
        let stored = repo.insert(alice()).resolve().await.unwrap();
        assert_eq!(stored, Some(alice()));

        let found = repo.find_by_id("u-1").resolve().await.unwrap();
        assert_eq!(found, Some(alice()));
    }

    #[tokio::test]
    async fn find_misses_resolve_empty() {
        let repo = MemoryRepository::new();
        assert_eq!(repo.find_by_id("nope").resolve().await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let repo = MemoryRepository::with_users([alice()]);
        let err = repo.insert(alice()).resolve().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RepoError>(),
            Some(&RepoError::DuplicateId("u-1".into()))
        );
    }

    #[tokio::test]
    async fn insert_all_stops_at_the_first_rejection() {
        let repo = MemoryRepository::with_users([bob()]);
        let users = vec![alice(), bob(), User::new("u-3", "carol", 41)];

        let err = repo.insert_all(users).collect().await.unwrap_err();
        assert!(err.to_string().contains("u-2"));

        // The record before the rejection landed; the one after did not.
        assert_eq!(repo.find_by_id("u-1").resolve().await.unwrap(), Some(alice()));
        assert_eq!(repo.find_by_id("u-3").resolve().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_updates_in_place_and_appends_new_ids() {
        let repo = MemoryRepository::with_users([alice(), bob()]);

        let mut renamed = alice();
        renamed.name = "alicia".to_string();
        repo.save(renamed.clone()).resolve().await.unwrap();
        repo.save(User::new("u-3", "carol", 41)).resolve().await.unwrap();

        let names: Vec<String> = repo
            .find_all()
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.name)
            .collect();
        assert_eq!(names, vec!["alicia", "bob", "carol"]);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let repo = MemoryRepository::with_users([alice()]);

        assert_eq!(repo.delete_by_id("u-1").resolve().await.unwrap(), Some(()));
        assert_eq!(repo.delete_by_id("u-1").resolve().await.unwrap(), None);
        assert_eq!(repo.find_by_id("u-1").resolve().await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_all_snapshots_at_subscribe_time() {
        let repo = MemoryRepository::new();
        let listing = repo.find_all();

        repo.insert(alice()).resolve().await.unwrap();
        repo.insert(bob()).resolve().await.unwrap();

        // Built before the inserts, subscribed after: cold flows see
        // current state.
        assert_eq!(listing.collect().await.unwrap(), vec![alice(), bob()]);
    }

    #[tokio::test]
    async fn find_by_name_filters_exactly() {
        let repo = MemoryRepository::with_users([
            alice(),
            bob(),
            User::new("u-3", "alice", 52),
        ]);

        let ids: Vec<String> = repo
            .find_by_name("alice")
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|user| user.id)
            .collect();
        assert_eq!(ids, vec!["u-1", "u-3"]);
    }
}
