// Copyright 2025 Cowboy AI, LLC.

//! Read cache decorator

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::notification::{
    ChangeHandler, ChangeNotification, ChangeNotifier, ChangeScope, ChangeSubscription,
    SubscriptionId,
};
use super::{Query, StoragePort};
use crate::errors::{PersistenceError, PersistenceResult};
use crate::metrics::{names, PersistenceMetrics};
use crate::transaction::{TransactionId, TransactionParticipant};
use crate::user::User;

/// Callers a cached read may be served to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheScope {
    /// Entries are served only to the caller that loaded them
    #[default]
    PerUser,
    /// Entries are served to every caller; the wrapped port must not depend on the caller
    Shared,
}

/// Configuration for a caching decorator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entity type used to match change notifications
    pub entity_type: String,
    /// Maximum number of cached keys
    pub key_capacity: usize,
    /// Maximum number of cached specification results
    pub specification_capacity: usize,
    /// Whether entries are kept per caller
    pub scope: CacheScope,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entity_type: "entity".to_string(),
            key_capacity: 1000,
            specification_capacity: 1000,
            scope: CacheScope::PerUser,
        }
    }
}

// `None` under a shared scope, the caller otherwise
type Caller = Option<User>;

type ValueCache<K, V> = LruCache<K, HashMap<Caller, Option<V>>>;
type QueryCache<K, C> = LruCache<(Caller, Query<C>), Vec<K>>;

struct CacheState<K: Hash + Eq, V, C> {
    entity_type: String,
    origin: Uuid,
    scope: CacheScope,
    // bumped before every invalidation; fills from an older generation are discarded
    generation: AtomicU64,
    values: Mutex<ValueCache<K, V>>,
    queries: Mutex<QueryCache<K, C>>,
}

impl<K: Hash + Eq + Clone, V: Clone, C: Clone + Hash + Eq> CacheState<K, V, C> {
    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn caller(&self, user: &User) -> Caller {
        match self.scope {
            CacheScope::PerUser => Some(user.clone()),
            CacheScope::Shared => None,
        }
    }

    fn values(&self) -> PersistenceResult<MutexGuard<'_, ValueCache<K, V>>> {
        self.values
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned("value cache"))
    }

    fn queries(&self) -> PersistenceResult<MutexGuard<'_, QueryCache<K, C>>> {
        self.queries
            .lock()
            .map_err(|_| PersistenceError::LockPoisoned("specification cache"))
    }

    fn lookup(&self, key: &K, caller: &Caller) -> PersistenceResult<Option<Option<V>>> {
        Ok(self
            .values()?
            .get(key)
            .and_then(|by_caller| by_caller.get(caller))
            .cloned())
    }

    fn store(
        &self,
        entries: impl IntoIterator<Item = (K, Option<V>)>,
        caller: &Caller,
        generation: u64,
    ) -> PersistenceResult<()> {
        let mut values = self.values()?;
        if self.current() == generation {
            for (key, value) in entries {
                if let Some(by_caller) = values.get_mut(&key) {
                    by_caller.insert(caller.clone(), value);
                } else {
                    values.put(key, HashMap::from([(caller.clone(), value)]));
                }
            }
        }
        Ok(())
    }

    fn lookup_query(&self, caller: &Caller, query: &Query<C>) -> PersistenceResult<Option<Vec<K>>> {
        Ok(self
            .queries()?
            .get(&(caller.clone(), query.clone()))
            .cloned())
    }

    fn store_query(
        &self,
        caller: Caller,
        query: Query<C>,
        keys: Vec<K>,
        generation: u64,
    ) -> PersistenceResult<()> {
        let mut queries = self.queries()?;
        if self.current() == generation {
            queries.put((caller, query), keys);
        }
        Ok(())
    }

    /// Drop the affected keys and every cached specification result
    fn invalidate(&self, scope: &ChangeScope<K>) -> PersistenceResult<usize> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = {
            let mut values = self.values()?;
            match scope {
                ChangeScope::Keys(keys) => keys.iter().filter(|k| values.pop(*k).is_some()).count(),
                ChangeScope::All => {
                    let count = values.len();
                    values.clear();
                    count
                }
            }
        };
        let mut queries = self.queries()?;
        let dropped = dropped + queries.len();
        queries.clear();
        Ok(dropped)
    }

    fn on_notification(&self, notification: &ChangeNotification<K>) {
        if notification.origin == self.origin || notification.entity_type != self.entity_type {
            return;
        }
        match self.invalidate(&notification.scope) {
            Ok(dropped) => debug!(
                "{} cache dropped {} entries on notification from {}",
                self.entity_type, dropped, notification.origin
            ),
            Err(e) => warn!("{} cache invalidation failed: {}", self.entity_type, e),
        }
    }
}

/// Storage port decorator memoizing reads
///
/// Every write invalidates synchronously, before delegating and again after,
/// so a read following a write through the same instance observes it.
/// Successful writes publish a [`ChangeNotification`]; notifications from
/// other instances invalidate this one.
///
/// Under [`CacheScope::PerUser`] an entry loaded for one caller is never
/// served to another, so the port may wrap an authorizing port. As a
/// [`TransactionParticipant`] it drops every entry on rollback; register it
/// after the ports it wraps so they are restored first.
pub struct CachingPort<P: StoragePort> {
    inner: P,
    state: Arc<CacheState<P::Key, P::Value, P::Criterion>>,
    notifier: Option<Arc<dyn ChangeNotifier<P::Key>>>,
    subscription: Mutex<Option<(Arc<dyn ChangeSubscription<P::Key>>, SubscriptionId)>>,
    metrics: PersistenceMetrics,
}

/// Builder for [`CachingPort`]
pub struct CachingPortBuilder<P: StoragePort> {
    inner: P,
    config: CacheConfig,
    notifier: Option<Arc<dyn ChangeNotifier<P::Key>>>,
    subscription: Option<Arc<dyn ChangeSubscription<P::Key>>>,
    metrics: PersistenceMetrics,
}

impl<P: StoragePort> CachingPortBuilder<P> {
    /// Create a new builder around a port
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            config: CacheConfig::default(),
            notifier: None,
            subscription: None,
            metrics: PersistenceMetrics::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the entity type name
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.config.entity_type = entity_type.into();
        self
    }

    /// Set the key cache capacity
    pub fn key_capacity(mut self, capacity: usize) -> Self {
        self.config.key_capacity = capacity;
        self
    }

    /// Set the specification cache capacity
    pub fn specification_capacity(mut self, capacity: usize) -> Self {
        self.config.specification_capacity = capacity;
        self
    }

    /// Set which callers share cached entries
    pub fn scope(mut self, scope: CacheScope) -> Self {
        self.config.scope = scope;
        self
    }

    /// Publish change notifications after successful writes
    pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier<P::Key>>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Invalidate on notifications delivered through this subscription
    pub fn subscription(mut self, subscription: Arc<dyn ChangeSubscription<P::Key>>) -> Self {
        self.subscription = Some(subscription);
        self
    }

    /// Record hits and misses in a shared metrics sink
    pub fn metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the decorator, subscribing when a subscription was given
    pub fn build(self) -> PersistenceResult<CachingPort<P>> {
        let key_capacity = NonZeroUsize::new(self.config.key_capacity).ok_or_else(|| {
            PersistenceError::InvalidConfiguration("key_capacity must be greater than zero".into())
        })?;
        let specification_capacity = NonZeroUsize::new(self.config.specification_capacity)
            .ok_or_else(|| {
                PersistenceError::InvalidConfiguration(
                    "specification_capacity must be greater than zero".into(),
                )
            })?;

        let state = Arc::new(CacheState {
            entity_type: self.config.entity_type.clone(),
            origin: Uuid::new_v4(),
            scope: self.config.scope,
            generation: AtomicU64::new(0),
            values: Mutex::new(LruCache::new(key_capacity)),
            queries: Mutex::new(LruCache::new(specification_capacity)),
        });

        let subscription = self.subscription.map(|subscription| {
            let handler_state = Arc::clone(&state);
            let handler: ChangeHandler<P::Key> =
                Arc::new(move |n: &ChangeNotification<P::Key>| handler_state.on_notification(n));
            let id = subscription.subscribe(&self.config.entity_type, handler);
            (subscription, id)
        });

        info!(
            "Cache for {} initialized with capacity {}/{} ({:?})",
            self.config.entity_type, key_capacity, specification_capacity, self.config.scope
        );

        Ok(CachingPort {
            inner: self.inner,
            state,
            notifier: self.notifier,
            subscription: Mutex::new(subscription),
            metrics: self.metrics,
        })
    }
}

impl<P: StoragePort> CachingPort<P> {
    /// Wrap a port with default configuration and no notification wiring
    pub fn new(inner: P) -> PersistenceResult<Self> {
        CachingPortBuilder::new(inner).build()
    }

    /// Start building a caching port
    pub fn builder(inner: P) -> CachingPortBuilder<P> {
        CachingPortBuilder::new(inner)
    }

    /// The wrapped port
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Entity type name matched against notifications
    pub fn entity_type(&self) -> &str {
        &self.state.entity_type
    }

    /// Which callers share cached entries
    pub fn scope(&self) -> CacheScope {
        self.state.scope
    }

    /// Metrics sink
    pub fn metrics(&self) -> &PersistenceMetrics {
        &self.metrics
    }

    /// Drop every cached entry and tell other instances to do the same
    pub async fn invalidate_all(&self) -> PersistenceResult<()> {
        self.invalidate(&ChangeScope::All).await?;
        self.publish(ChangeScope::All);
        Ok(())
    }

    /// Stop reacting to change notifications
    pub fn shutdown(&self) {
        let taken = match self.subscription.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((subscription, id)) = taken {
            subscription.unsubscribe(id);
            debug!("{} cache unsubscribed", self.state.entity_type);
        }
    }

    async fn invalidate(&self, scope: &ChangeScope<P::Key>) -> PersistenceResult<()> {
        let dropped = self.state.invalidate(scope)?;
        if dropped > 0 {
            self.metrics
                .add(names::CACHE_INVALIDATION, dropped as u64)
                .await;
        }
        Ok(())
    }

    fn publish(&self, scope: ChangeScope<P::Key>) {
        if let Some(notifier) = &self.notifier {
            notifier.publish(ChangeNotification {
                entity_type: self.state.entity_type.clone(),
                scope,
                origin: self.state.origin,
            });
        }
    }

    async fn write_through<F>(&self, keys: Vec<P::Key>, write: F) -> PersistenceResult<()>
    where
        F: Future<Output = PersistenceResult<()>> + Send,
    {
        let scope = ChangeScope::Keys(keys);
        self.invalidate(&scope).await?;
        let result = write.await;
        self.invalidate(&scope).await?;
        result?;
        self.publish(scope);
        Ok(())
    }
}

impl<P: StoragePort> Drop for CachingPort<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl<P: StoragePort> StoragePort for CachingPort<P> {
    type Key = P::Key;
    type Value = P::Value;
    type Criterion = P::Criterion;

    async fn insert_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        let keys = entries.iter().map(|(k, _)| k.clone()).collect();
        self.write_through(keys, self.inner.insert_many(entries, user))
            .await
    }

    async fn update_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        let keys = entries.iter().map(|(k, _)| k.clone()).collect();
        self.write_through(keys, self.inner.update_many(entries, user))
            .await
    }

    async fn delete_many(&self, keys: Vec<Self::Key>, user: &User) -> PersistenceResult<()> {
        let affected = keys.clone();
        self.write_through(affected, self.inner.delete_many(keys, user))
            .await
    }

    async fn exists(&self, key: &Self::Key, user: &User) -> PersistenceResult<bool> {
        if let Some(cached) = self.state.lookup(key, &self.state.caller(user))? {
            self.metrics.increment(names::CACHE_HIT).await;
            return Ok(cached.is_some());
        }
        self.inner.exists(key, user).await
    }

    async fn get(&self, key: &Self::Key, user: &User) -> PersistenceResult<Option<Self::Value>> {
        let caller = self.state.caller(user);
        if let Some(cached) = self.state.lookup(key, &caller)? {
            self.metrics.increment(names::CACHE_HIT).await;
            return Ok(cached);
        }
        self.metrics.increment(names::CACHE_MISS).await;
        let generation = self.state.current();
        let value = self.inner.get(key, user).await?;
        self.state
            .store([(key.clone(), value.clone())], &caller, generation)?;
        Ok(value)
    }

    async fn get_all(&self, user: &User) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let generation = self.state.current();
        let entries = self.inner.get_all(user).await?;
        self.state.store(
            entries.iter().map(|(k, v)| (k.clone(), Some(v.clone()))),
            &self.state.caller(user),
            generation,
        )?;
        Ok(entries)
    }

    async fn get_by_keys(
        &self,
        keys: &[Self::Key],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let caller = self.state.caller(user);
        let mut found: HashMap<Self::Key, Option<Self::Value>> = HashMap::with_capacity(keys.len());
        let mut misses = Vec::new();
        for key in keys {
            match self.state.lookup(key, &caller)? {
                Some(cached) => {
                    found.insert(key.clone(), cached);
                }
                None => misses.push(key.clone()),
            }
        }
        self.metrics
            .add(names::CACHE_HIT, (keys.len() - misses.len()) as u64)
            .await;

        if !misses.is_empty() {
            self.metrics
                .add(names::CACHE_MISS, misses.len() as u64)
                .await;
            let generation = self.state.current();
            let fetched = self.inner.get_by_keys(&misses, user).await?;
            self.state.store(
                fetched.iter().map(|(k, v)| (k.clone(), Some(v.clone()))),
                &caller,
                generation,
            )?;
            found.extend(fetched.into_iter().map(|(k, v)| (k, Some(v))));
        }

        Ok(keys
            .iter()
            .filter_map(|k| found.get(k).cloned().flatten().map(|v| (k.clone(), v)))
            .collect())
    }

    async fn get_by_specification(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let caller = self.state.caller(user);
        if let Some(keys) = self.state.lookup_query(&caller, query)? {
            self.metrics.increment(names::CACHE_HIT).await;
            return self.get_by_keys(&keys, user).await;
        }
        self.metrics.increment(names::CACHE_MISS).await;
        let generation = self.state.current();
        let entries = self.inner.get_by_specification(query, user).await?;
        self.state.store(
            entries.iter().map(|(k, v)| (k.clone(), Some(v.clone()))),
            &caller,
            generation,
        )?;
        self.state.store_query(
            caller,
            query.clone(),
            entries.iter().map(|(k, _)| k.clone()).collect(),
            generation,
        )?;
        Ok(entries)
    }
}

#[async_trait]
impl<P: StoragePort> TransactionParticipant for CachingPort<P> {
    async fn begin(&self, _transaction: TransactionId) -> PersistenceResult<()> {
        Ok(())
    }

    async fn commit(&self, _transaction: TransactionId) -> PersistenceResult<()> {
        Ok(())
    }

    /// Reads made inside the unit of work may have seen rolled-back rows
    async fn rollback(&self, transaction: TransactionId) -> PersistenceResult<()> {
        debug!(
            "{} cache cleared on rollback of {}",
            self.state.entity_type, transaction
        );
        self.invalidate_all().await
    }
}
