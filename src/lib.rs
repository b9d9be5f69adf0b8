// Copyright 2025 Cowboy AI, LLC.

//! # CIM Term Store
//!
//! Persistence core for graph-structured terminology data.
//!
//! This crate provides the building blocks between an application and its
//! storage backends:
//! - **Specifications**: composable predicates evaluated in memory or compiled
//!   to a relational fragment or a search query tree
//! - **Query parser**: boolean text queries such as `p.label:ab* AND NOT code:x^2`
//! - **Storage ports**: a minimal key/value capability with caching and
//!   authorization decorators that stack in any order
//! - **Repositories**: aggregates composed from several ports, with
//!   transactional and write-audit wrappers
//! - **Sequences**: batched allocation of named integer sequences
//!
//! ## Design Principles
//!
//! 1. **One predicate, several engines**: a specification that cannot compile
//!    for the requested backend fails instead of silently falling back
//! 2. **Decorators over inheritance**: every cross-cutting concern wraps a port
//!    and returns a port
//! 3. **Caller identity everywhere**: every storage call carries the [`User`]

#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod metrics;
pub mod node;
pub mod query_parser;
pub mod repository;
pub mod sequence;
pub mod specification;
pub mod storage;
pub mod transaction;
pub mod user;

pub use config::PersistenceConfig;
pub use errors::{ParseError, PersistenceError, PersistenceResult};
pub use metrics::{MetricsSummary, MetricsTimer, PersistenceMetrics};
pub use query_parser::{parse_query, FieldTerm, FromTerm, TermValue};
pub use repository::{
    AuditOutcome, AuditRecord, AuditSink, MemoryAuditSink, Repository, SaveMode,
    TransactionalRepository, WriteAuditRepository,
};
pub use sequence::{
    CachedSequenceAllocator, DirectSequenceAllocator, MemorySequenceCounter, SequenceAllocator,
    SequenceConfig, SequenceCounter,
};
pub use specification::{Criterion, QueryBackend, Specification};
pub use storage::{
    AuthorizedPort, CachingPort, EnforcementMode, MemoryStoragePort, Permission,
    PermissionEvaluator, Query, StoragePort,
};
pub use transaction::{
    MemoryTransactionManager, Transaction, TransactionId, TransactionManager,
    TransactionParticipant,
};
pub use user::{AppRole, User};
