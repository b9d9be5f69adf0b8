// Copyright 2025 Cowboy AI, LLC.

//! # Storage Layer
//!
//! A minimal key/value [`StoragePort`] and the decorators that stack on it.
//! Every decorator takes and returns a port, so the chain order is chosen at
//! assembly time.
//!
//! ## Components
//!
//! - **StoragePort**: bulk and single writes, keyed lookups, enumeration by specification
//! - **MemoryStoragePort**: reference adapter with snapshot transactions
//! - **CachingPort**: LRU read cache with write-through invalidation and change notifications
//! - **AuthorizedPort**: permission checks in throw or filter mode
//! - **ExpiringCache**: fixed-lifetime cache for short-lived results such as permission checks

mod authorization;
mod caching;
mod expiring;
mod memory;
mod notification;
mod query;

pub use authorization::{
    all_of, any_of, app_admin, deny_all, permit_all, AuthorizationConfig, AuthorizedPort,
    EnforcementMode, GrantTable, MemoizingEvaluator, Permission, PermissionEvaluator,
    PermissionMemoConfig,
};
pub use caching::{CacheConfig, CacheScope, CachingPort, CachingPortBuilder};
pub use expiring::ExpiringCache;
pub use memory::MemoryStoragePort;
pub use notification::{
    ChangeHandler, ChangeNotification, ChangeNotifier, ChangeScope, ChangeSubscription,
    InProcessChangeBus, SubscriptionId,
};
pub use query::{
    finish_query, sort_entries, Query, QueryBuilder, SortDirection, SortKey, SortValue, Sortable,
};

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::errors::PersistenceResult;
use crate::specification::Criterion;
use crate::user::User;

/// Minimal key/value persistence capability
///
/// Inserting a present key, and updating or deleting an absent one, is an
/// `IntegrityViolation`. Ports perform no permission or cache logic.
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Natural key
    type Key: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;
    /// Stored value
    type Value: Clone + Debug + Send + Sync + 'static;
    /// Leaf predicates accepted by `get_by_specification`
    type Criterion: Criterion<Key = Self::Key, Value = Self::Value>;

    /// Insert new entries
    async fn insert_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()>;

    /// Insert one new entry
    async fn insert_one(
        &self,
        key: Self::Key,
        value: Self::Value,
        user: &User,
    ) -> PersistenceResult<()> {
        self.insert_many(vec![(key, value)], user).await
    }

    /// Replace values of existing entries
    async fn update_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()>;

    /// Replace the value of one existing entry
    async fn update_one(
        &self,
        key: Self::Key,
        value: Self::Value,
        user: &User,
    ) -> PersistenceResult<()> {
        self.update_many(vec![(key, value)], user).await
    }

    /// Delete existing entries
    async fn delete_many(&self, keys: Vec<Self::Key>, user: &User) -> PersistenceResult<()>;

    /// Delete one existing entry
    async fn delete_one(&self, key: Self::Key, user: &User) -> PersistenceResult<()> {
        self.delete_many(vec![key], user).await
    }

    /// Check whether a key is present
    async fn exists(&self, key: &Self::Key, user: &User) -> PersistenceResult<bool>;

    /// Look up one value
    async fn get(&self, key: &Self::Key, user: &User) -> PersistenceResult<Option<Self::Value>>;

    /// Every entry in storage order
    async fn get_all(&self, user: &User) -> PersistenceResult<Vec<(Self::Key, Self::Value)>>;

    /// Entries for the given keys in request order; absent keys are skipped
    async fn get_by_keys(
        &self,
        keys: &[Self::Key],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>>;

    /// Entries accepted by a specification
    async fn get_by_specification(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>>;
}

#[async_trait]
impl<P: StoragePort + ?Sized> StoragePort for Arc<P> {
    type Key = P::Key;
    type Value = P::Value;
    type Criterion = P::Criterion;

    async fn insert_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        (**self).insert_many(entries, user).await
    }

    async fn insert_one(
        &self,
        key: Self::Key,
        value: Self::Value,
        user: &User,
    ) -> PersistenceResult<()> {
        (**self).insert_one(key, value, user).await
    }

    async fn update_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        (**self).update_many(entries, user).await
    }

    async fn update_one(
        &self,
        key: Self::Key,
        value: Self::Value,
        user: &User,
    ) -> PersistenceResult<()> {
        (**self).update_one(key, value, user).await
    }

    async fn delete_many(&self, keys: Vec<Self::Key>, user: &User) -> PersistenceResult<()> {
        (**self).delete_many(keys, user).await
    }

    async fn delete_one(&self, key: Self::Key, user: &User) -> PersistenceResult<()> {
        (**self).delete_one(key, user).await
    }

    async fn exists(&self, key: &Self::Key, user: &User) -> PersistenceResult<bool> {
        (**self).exists(key, user).await
    }

    async fn get(&self, key: &Self::Key, user: &User) -> PersistenceResult<Option<Self::Value>> {
        (**self).get(key, user).await
    }

    async fn get_all(&self, user: &User) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        (**self).get_all(user).await
    }

    async fn get_by_keys(
        &self,
        keys: &[Self::Key],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        (**self).get_by_keys(keys, user).await
    }

    async fn get_by_specification(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        (**self).get_by_specification(query, user).await
    }
}
