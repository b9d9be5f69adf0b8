// Copyright 2025 Cowboy AI, LLC.

//! Write auditing wrapper

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::{Repository, SaveMode};
use crate::errors::PersistenceResult;
use crate::metrics::{MetricsTimer, PersistenceMetrics};
use crate::storage::Query;
use crate::user::User;

/// Result of an audited call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    /// Call succeeded
    Success,
    /// Call failed with this error message
    Failure(String),
}

/// One audited mutating call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// `save` or `delete`
    pub operation: String,
    /// Repository entity type
    pub entity_type: String,
    /// Caller
    pub user: String,
    /// Affected ids, debug formatted
    pub keys: Vec<String>,
    /// Outcome
    pub outcome: AuditOutcome,
    /// Duration of the wrapped call
    pub elapsed_ms: u64,
    /// When the call finished
    pub timestamp: DateTime<Utc>,
}

/// Receives audit records
pub trait AuditSink: Send + Sync {
    /// Store a record
    fn record(&self, record: AuditRecord);
}

/// Sink keeping records in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(_) => warn!("Audit sink lock poisoned, dropping record"),
        }
    }
}

/// Audits every mutating call of a repository
pub struct WriteAuditRepository<R> {
    inner: R,
    sink: Option<Arc<dyn AuditSink>>,
    metrics: PersistenceMetrics,
}

impl<R: Repository> WriteAuditRepository<R> {
    /// Wrap a repository, logging records only
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            sink: None,
            metrics: PersistenceMetrics::new(),
        }
    }

    /// Also hand records to a sink
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Time calls in a shared metrics sink
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics sink
    pub fn metrics(&self) -> &PersistenceMetrics {
        &self.metrics
    }

    /// The wrapped repository
    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn emit<T>(
        &self,
        operation: &str,
        user: &User,
        keys: &[R::Id],
        result: &PersistenceResult<T>,
        elapsed_ms: u64,
    ) {
        let outcome = match result {
            Ok(_) => AuditOutcome::Success,
            Err(e) => AuditOutcome::Failure(e.to_string()),
        };
        let record = AuditRecord {
            operation: operation.to_string(),
            entity_type: self.inner.entity_type().to_string(),
            user: user.username.clone(),
            keys: keys.iter().map(|k| format!("{k:?}")).collect(),
            outcome,
            elapsed_ms,
            timestamp: Utc::now(),
        };
        info!(
            target: "audit",
            operation = %record.operation,
            entity_type = %record.entity_type,
            user = %record.user,
            keys = record.keys.len(),
            outcome = ?record.outcome,
            elapsed_ms = record.elapsed_ms,
            "write audited"
        );
        if let Some(sink) = &self.sink {
            sink.record(record);
        }
    }
}

#[async_trait]
impl<R: Repository> Repository for WriteAuditRepository<R> {
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
        let keys: Vec<_> = aggregates.iter().map(|a| self.inner.aggregate_id(a)).collect();
        let timer = MetricsTimer::start(&self.metrics, "repository.save");
        let result = self.inner.save(aggregates, mode, user).await;
        let elapsed = timer.finish(result.is_ok()).await;
        self.emit("save", user, &keys, &result, elapsed.as_millis() as u64);
        result
    }

    async fn delete(&self, ids: Vec<Self::Id>, user: &User) -> PersistenceResult<()> {
        let keys = ids.clone();
        let timer = MetricsTimer::start(&self.metrics, "repository.delete");
        let result = self.inner.delete(ids, user).await;
        let elapsed = timer.finish(result.is_ok()).await;
        self.emit("delete", user, &keys, &result, elapsed.as_millis() as u64);
        result
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
