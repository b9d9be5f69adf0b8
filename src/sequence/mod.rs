// Copyright 2025 Cowboy AI, LLC.

//! # Sequence Allocation
//!
//! Named integer sequences handed out from an authoritative counter.
//!
//! - **SequenceCounter**: the authoritative store (`get`, `advance_by`, `set`)
//! - **DirectSequenceAllocator**: one counter round-trip per value
//! - **CachedSequenceAllocator**: reserves ranges of `batch_size` values and
//!   hands back the unused tail on `close`
//!
//! A cached allocator assumes it is the only writer of each sequence name.

mod cached;

pub use cached::{CachedSequenceAllocator, SequenceConfig};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::{PersistenceError, PersistenceResult};

/// Authoritative counter collaborator
#[async_trait]
pub trait SequenceCounter: Send + Sync {
    /// Current value; unknown names read 0
    async fn get(&self, name: &str) -> PersistenceResult<i64>;

    /// Atomically add `delta`, returning the new value
    async fn advance_by(&self, name: &str, delta: i64) -> PersistenceResult<i64>;

    /// Overwrite the value
    async fn set(&self, name: &str, value: i64) -> PersistenceResult<()>;
}

#[async_trait]
impl<S: SequenceCounter + ?Sized> SequenceCounter for Arc<S> {
    async fn get(&self, name: &str) -> PersistenceResult<i64> {
        (**self).get(name).await
    }

    async fn advance_by(&self, name: &str, delta: i64) -> PersistenceResult<i64> {
        (**self).advance_by(name, delta).await
    }

    async fn set(&self, name: &str, value: i64) -> PersistenceResult<()> {
        (**self).set(name, value).await
    }
}

/// Hands out sequence values
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    /// Value the next `get_and_advance` will return, without consuming it
    async fn get(&self, name: &str) -> PersistenceResult<i64>;

    /// Next value, consumed
    async fn get_and_advance(&self, name: &str) -> PersistenceResult<i64>;

    /// Release any locally held state
    async fn close(&self) -> PersistenceResult<()>;
}

pub(crate) fn exhausted(sequence: &str, reason: impl ToString) -> PersistenceError {
    PersistenceError::AllocatorExhaustion {
        sequence: sequence.to_string(),
        reason: reason.to_string(),
    }
}

/// In-process counter
#[derive(Default)]
pub struct MemorySequenceCounter {
    values: Mutex<HashMap<String, i64>>,
}

impl MemorySequenceCounter {
    /// Counter with every sequence at 0
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceCounter for MemorySequenceCounter {
    async fn get(&self, name: &str) -> PersistenceResult<i64> {
        Ok(self.values.lock().await.get(name).copied().unwrap_or(0))
    }

    async fn advance_by(&self, name: &str, delta: i64) -> PersistenceResult<i64> {
        let mut values = self.values.lock().await;
        let current = values.get(name).copied().unwrap_or(0);
        let next = current
            .checked_add(delta)
            .ok_or_else(|| PersistenceError::Storage(format!("counter {name} overflowed")))?;
        values.insert(name.to_string(), next);
        Ok(next)
    }

    async fn set(&self, name: &str, value: i64) -> PersistenceResult<()> {
        self.values.lock().await.insert(name.to_string(), value);
        Ok(())
    }
}

/// Allocator advancing the counter on every call
pub struct DirectSequenceAllocator<S> {
    counter: S,
}

impl<S: SequenceCounter> DirectSequenceAllocator<S> {
    /// Wrap a counter
    pub fn new(counter: S) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl<S: SequenceCounter> SequenceAllocator for DirectSequenceAllocator<S> {
    async fn get(&self, name: &str) -> PersistenceResult<i64> {
        self.counter.get(name).await.map_err(|e| exhausted(name, e))
    }

    async fn get_and_advance(&self, name: &str) -> PersistenceResult<i64> {
        let next = self
            .counter
            .advance_by(name, 1)
            .await
            .map_err(|e| exhausted(name, e))?;
        next.checked_sub(1)
            .ok_or_else(|| exhausted(name, "counter returned its minimum value"))
    }

    async fn close(&self) -> PersistenceResult<()> {
        Ok(())
    }
}
