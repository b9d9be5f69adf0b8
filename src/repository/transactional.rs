// Copyright 2025 Cowboy AI, LLC.

//! Unit-of-work wrapper

use async_trait::async_trait;
use std::future::Future;
use tracing::{error, trace};

use super::{Repository, SaveMode};
use crate::errors::PersistenceResult;
use crate::storage::Query;
use crate::transaction::TransactionManager;
use crate::user::User;

/// Runs every mutating call of a repository in its own unit of work
///
/// Success commits once after the wrapped call returns; failure rolls back
/// and returns the original error. Reads pass straight through.
pub struct TransactionalRepository<R, T> {
    inner: R,
    transactions: T,
}

impl<R: Repository, T: TransactionManager> TransactionalRepository<R, T> {
    /// Wrap a repository
    pub fn new(inner: R, transactions: T) -> Self {
        Self {
            inner,
            transactions,
        }
    }

    /// The wrapped repository
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn in_transaction<O, F>(&self, operation: &str, work: F) -> PersistenceResult<O>
    where
        O: Send,
        F: Future<Output = PersistenceResult<O>> + Send,
    {
        trace!("Opening transaction for {} {operation}", self.inner.entity_type());
        let transaction = self.transactions.begin().await?;
        let id = transaction.id();
        match work.await {
            Ok(output) => {
                trace!("Committing transaction {id}");
                self.transactions.commit(transaction).await?;
                Ok(output)
            }
            Err(e) => {
                trace!("Rolling back transaction {id}");
                if let Err(rollback) = self.transactions.rollback(transaction).await {
                    error!("Rollback of transaction {id} failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<R: Repository, T: TransactionManager> Repository for TransactionalRepository<R, T> {
    type Id = R::Id;
    type Aggregate = R::Aggregate;
    type Criterion = R::Criterion;

    fn entity_type(&self) -> &str {
        self.inner.entity_type()
    }

    fn aggregate_id(&self, aggregate: &Self::Aggregate) -> Self::Id {
        self.inner.aggregate_id(aggregate)
    }

    async fn save(
        &self,
        aggregates: Vec<Self::Aggregate>,
        mode: SaveMode,
        user: &User,
    ) -> PersistenceResult<Vec<Self::Id>> {
        self.in_transaction("save", self.inner.save(aggregates, mode, user))
            .await
    }

    async fn delete(&self, ids: Vec<Self::Id>, user: &User) -> PersistenceResult<()> {
        self.in_transaction("delete", self.inner.delete(ids, user))
            .await
    }

    async fn exists(&self, id: &Self::Id, user: &User) -> PersistenceResult<bool> {
        self.inner.exists(id, user).await
    }

    async fn get(&self, id: &Self::Id, user: &User) -> PersistenceResult<Option<Self::Aggregate>> {
        self.inner.get(id, user).await
    }

    async fn get_by_ids(
        &self,
        ids: &[Self::Id],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Id, Self::Aggregate)>> {
        self.inner.get_by_ids(ids, user).await
    }

    async fn get_by_query(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Id, Self::Aggregate)>> {
        self.inner.get_by_query(query, user).await
    }
}
