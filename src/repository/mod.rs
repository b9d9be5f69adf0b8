// Copyright 2025 Cowboy AI, LLC.

//! # Repositories
//!
//! Aggregate-level persistence composed from storage ports, plus wrappers
//! that add units of work and write auditing to any repository.

mod audit;
mod transactional;

pub use audit::{AuditOutcome, AuditRecord, AuditSink, MemoryAuditSink, WriteAuditRepository};
pub use transactional::TransactionalRepository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::errors::{PersistenceError, PersistenceResult};
use crate::specification::Criterion;
use crate::storage::Query;
use crate::user::User;

/// How `save` treats existing aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SaveMode {
    /// Insert new aggregates, update existing ones
    #[default]
    Upsert,
    /// Fail with `IntegrityViolation` if an aggregate exists
    Insert,
    /// Fail with `IntegrityViolation` if an aggregate does not exist
    Update,
}

/// Aggregate persistence
#[async_trait]
pub trait Repository: Send + Sync {
    /// Aggregate identity
    type Id: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;
    /// Populated aggregate
    type Aggregate: Clone + Debug + Send + Sync + 'static;
    /// Leaf predicates accepted by `get_by_query`
    type Criterion: Criterion<Key = Self::Id, Value = Self::Aggregate>;

    /// Entity type name used in logs and audit records
    fn entity_type(&self) -> &str;

    /// Identity of an aggregate
    fn aggregate_id(&self, aggregate: &Self::Aggregate) -> Self::Id;

    /// Save aggregates, returning their ids in input order
    async fn save(
        &self,
        aggregates: Vec<Self::Aggregate>,
        mode: SaveMode,
        user: &User,
    ) -> PersistenceResult<Vec<Self::Id>>;

    /// Save one aggregate
    async fn save_one(
        &self,
        aggregate: Self::Aggregate,
        mode: SaveMode,
        user: &User,
    ) -> PersistenceResult<Self::Id> {
        self.save(vec![aggregate], mode, user)
            .await?
            .pop()
            .ok_or_else(|| {
                PersistenceError::Storage(format!("{}: save returned no id", self.entity_type()))
            })
    }

    /// Delete aggregates together with the rows they own
    async fn delete(&self, ids: Vec<Self::Id>, user: &User) -> PersistenceResult<()>;

    /// Delete one aggregate
    async fn delete_one(&self, id: Self::Id, user: &User) -> PersistenceResult<()> {
        self.delete(vec![id], user).await
    }

    /// Check whether an aggregate exists
    async fn exists(&self, id: &Self::Id, user: &User) -> PersistenceResult<bool>;

    /// Load one aggregate
    async fn get(&self, id: &Self::Id, user: &User) -> PersistenceResult<Option<Self::Aggregate>> {
        Ok(self
            .get_by_ids(std::slice::from_ref(id), user)
            .await?
            .pop()
            .map(|(_, aggregate)| aggregate))
    }

    /// Load aggregates in request order; missing ids are skipped
    async fn get_by_ids(
        &self,
        ids: &[Self::Id],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Id, Self::Aggregate)>>;

    /// Load aggregates accepted by a query
    async fn get_by_query(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Id, Self::Aggregate)>>;
}

#[async_trait]
impl<R: Repository + ?Sized> Repository for Arc<R> {
    type Id = R::Id;
    type Aggregate = R::Aggregate;
    type Criterion = R::Criterion;

    fn entity_type(&self) -> &str {
        (**self).entity_type()
    }

    fn aggregate_id(&self, aggregate: &Self::Aggregate) -> Self::Id {
        (**self).aggregate_id(aggregate)
    }

    async fn save(
        &self,
        aggregates: Vec<Self::Aggregate>,
        mode: SaveMode,
        user: &User,
    ) -> PersistenceResult<Vec<Self::Id>> {
        (**self).save(aggregates, mode, user).await
    }

    async fn delete(&self, ids: Vec<Self::Id>, user: &User) -> PersistenceResult<()> {
        (**self).delete(ids, user).await
    }

    async fn exists(&self, id: &Self::Id, user: &User) -> PersistenceResult<bool> {
        (**self).exists(id, user).await
    }

    async fn get(&self, id: &Self::Id, user: &User) -> PersistenceResult<Option<Self::Aggregate>> {
        (**self).get(id, user).await
    }

    async fn get_by_ids(
        &self,
        ids: &[Self::Id],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Id, Self::Aggregate)>> {
        (**self).get_by_ids(ids, user).await
    }

    async fn get_by_query(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Id, Self::Aggregate)>> {
        (**self).get_by_query(query, user).await
    }
}
