// Copyright 2025 Cowboy AI, LLC.

//! In-memory storage port

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{finish_query, Query, Sortable, StoragePort};
use crate::errors::{PersistenceError, PersistenceResult};
use crate::specification::Criterion;
use crate::transaction::{TransactionId, TransactionParticipant};
use crate::user::User;

/// Storage port backed by an insertion-ordered map
///
/// Batches are validated in full before any entry is applied. Specifications
/// are checked against the query's requested backend before being evaluated
/// with `accept`, so a tree the backend cannot compile fails instead of
/// silently falling back.
pub struct MemoryStoragePort<C: Criterion> {
    name: String,
    entries: RwLock<IndexMap<C::Key, C::Value>>,
    snapshot: Mutex<Option<(TransactionId, IndexMap<C::Key, C::Value>)>>,
}

impl<C: Criterion> MemoryStoragePort<C>
where
    C::Key: Clone + Eq + Hash + Ord + Debug,
    C::Value: Clone + Debug + Sortable,
{
    /// Create an empty port
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(IndexMap::new()),
            snapshot: Mutex::new(None),
        }
    }

    /// Port name used in log lines and error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the port holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<C: Criterion> StoragePort for MemoryStoragePort<C>
where
    C::Key: Clone + Eq + Hash + Ord + Debug + 'static,
    C::Value: Clone + Debug + Sortable + 'static,
{
    type Key = C::Key;
    type Value = C::Value;
    type Criterion = C;

    async fn insert_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        _user: &User,
    ) -> PersistenceResult<()> {
        let mut map = self.entries.write().await;
        let mut seen = HashSet::with_capacity(entries.len());
        for (key, _) in &entries {
            if map.contains_key(key) || !seen.insert(key) {
                return Err(PersistenceError::integrity(format!(
                    "{}: duplicate key {key:?}",
                    self.name
                )));
            }
        }
        debug!("{}: inserting {} entries", self.name, entries.len());
        map.extend(entries);
        Ok(())
    }

    async fn update_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        _user: &User,
    ) -> PersistenceResult<()> {
        let mut map = self.entries.write().await;
        if let Some((key, _)) = entries.iter().find(|(key, _)| !map.contains_key(key)) {
            return Err(PersistenceError::integrity(format!(
                "{}: cannot update missing key {key:?}",
                self.name
            )));
        }
        debug!("{}: updating {} entries", self.name, entries.len());
        for (key, value) in entries {
            map.insert(key, value);
        }
        Ok(())
    }

    async fn delete_many(&self, keys: Vec<Self::Key>, _user: &User) -> PersistenceResult<()> {
        let mut map = self.entries.write().await;
        if let Some(key) = keys.iter().find(|key| !map.contains_key(*key)) {
            return Err(PersistenceError::integrity(format!(
                "{}: cannot delete missing key {key:?}",
                self.name
            )));
        }
        debug!("{}: deleting {} entries", self.name, keys.len());
        for key in &keys {
            map.shift_remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &Self::Key, _user: &User) -> PersistenceResult<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &Self::Key, _user: &User) -> PersistenceResult<Option<Self::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn get_all(&self, _user: &User) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let map = self.entries.read().await;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    async fn get_by_keys(
        &self,
        keys: &[Self::Key],
        _user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let map = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn get_by_specification(
        &self,
        query: &Query<Self::Criterion>,
        _user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        query.specification.ensure_supported(query.backend)?;
        let matched: Vec<_> = {
            let map = self.entries.read().await;
            map.iter()
                .filter(|(k, v)| query.specification.accept(k, v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(finish_query(matched, query))
    }
}

#[async_trait]
impl<C: Criterion> TransactionParticipant for MemoryStoragePort<C>
where
    C::Key: Clone + Eq + Hash + Ord + Debug + 'static,
    C::Value: Clone + Debug + Sortable + 'static,
{
    async fn begin(&self, transaction: TransactionId) -> PersistenceResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        if let Some((open, _)) = snapshot.as_ref() {
            return Err(PersistenceError::Transaction(format!(
                "{}: transaction {open} still open",
                self.name
            )));
        }
        *snapshot = Some((transaction, self.entries.read().await.clone()));
        Ok(())
    }

    async fn commit(&self, transaction: TransactionId) -> PersistenceResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        match snapshot.take() {
            Some((open, _)) if open == transaction => Ok(()),
            other => {
                *snapshot = other;
                Err(PersistenceError::Transaction(format!(
                    "{}: transaction {transaction} is not open",
                    self.name
                )))
            }
        }
    }

    async fn rollback(&self, transaction: TransactionId) -> PersistenceResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        match snapshot.take() {
            Some((open, saved)) if open == transaction => {
                *self.entries.write().await = saved;
                debug!("{}: restored snapshot of transaction {transaction}", self.name);
                Ok(())
            }
            other => {
                *snapshot = other;
                Err(PersistenceError::Transaction(format!(
                    "{}: transaction {transaction} is not open",
                    self.name
                )))
            }
        }
    }
}
