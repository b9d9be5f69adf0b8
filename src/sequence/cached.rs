// Copyright 2025 Cowboy AI, LLC.

//! Batched allocator reserving ranges from the counter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{exhausted, SequenceAllocator, SequenceCounter};
use crate::errors::{PersistenceError, PersistenceResult};
use crate::metrics::{names, PersistenceMetrics};

/// Configuration for [`CachedSequenceAllocator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Values reserved per counter round-trip
    pub batch_size: i64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Locally held range `[next, ceiling)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reservation {
    next: i64,
    ceiling: i64,
}

/// Allocator handing out values from locally reserved ranges
///
/// Exhausting a range advances the counter by `batch_size` in one call and
/// reserves `[new - batch_size, new)`. `close` sets each counter back to the
/// local cursor. Values of a range not released before a crash are skipped.
pub struct CachedSequenceAllocator<S> {
    counter: S,
    batch_size: i64,
    reservations: Mutex<HashMap<String, Reservation>>,
    metrics: PersistenceMetrics,
}

impl<S: SequenceCounter> CachedSequenceAllocator<S> {
    /// Create an allocator; `batch_size` must be at least 1
    pub fn new(counter: S, config: &SequenceConfig) -> PersistenceResult<Self> {
        if config.batch_size < 1 {
            return Err(PersistenceError::InvalidConfiguration(format!(
                "batch_size must be at least 1, got {}",
                config.batch_size
            )));
        }
        Ok(Self {
            counter,
            batch_size: config.batch_size,
            reservations: Mutex::new(HashMap::new()),
            metrics: PersistenceMetrics::new(),
        })
    }

    /// Record refills and releases in a shared metrics sink
    pub fn with_metrics(mut self, metrics: PersistenceMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Values reserved per refill
    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// The authoritative counter
    pub fn counter(&self) -> &S {
        &self.counter
    }

    async fn refill(&self, name: &str) -> PersistenceResult<Reservation> {
        let ceiling = self
            .counter
            .advance_by(name, self.batch_size)
            .await
            .map_err(|e| exhausted(name, e))?;
        let next = ceiling
            .checked_sub(self.batch_size)
            .ok_or_else(|| exhausted(name, "reserved range underflows"))?;
        self.metrics.increment(names::SEQUENCE_REFILL).await;
        debug!("Sequence {name} reserved [{next}, {ceiling})");
        Ok(Reservation { next, ceiling })
    }
}

#[async_trait]
impl<S: SequenceCounter> SequenceAllocator for CachedSequenceAllocator<S> {
    async fn get(&self, name: &str) -> PersistenceResult<i64> {
        let reservations = self.reservations.lock().await;
        match reservations.get(name) {
            Some(r) if r.next < r.ceiling => Ok(r.next),
            _ => self.counter.get(name).await.map_err(|e| exhausted(name, e)),
        }
    }

    async fn get_and_advance(&self, name: &str) -> PersistenceResult<i64> {
        let mut reservations = self.reservations.lock().await;
        let current = match reservations.get(name) {
            Some(r) if r.next < r.ceiling => *r,
            _ => self.refill(name).await?,
        };
        reservations.insert(
            name.to_string(),
            Reservation {
                next: current.next + 1,
                ceiling: current.ceiling,
            },
        );
        Ok(current.next)
    }

    async fn close(&self) -> PersistenceResult<()> {
        let mut reservations = self.reservations.lock().await;
        let mut first_error = None;
        for (name, reservation) in reservations.drain() {
            match self.counter.set(&name, reservation.next).await {
                Ok(()) => {
                    let released = reservation.ceiling - reservation.next;
                    self.metrics
                        .add(names::SEQUENCE_RELEASE, released as u64)
                        .await;
                    debug!("Sequence {name} released {released} values");
                }
                Err(e) => {
                    warn!("Failed to release sequence {name}: {e}");
                    first_error.get_or_insert(exhausted(&name, e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
