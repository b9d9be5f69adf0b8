// Copyright 2025 Cowboy AI, LLC.

//! Counters and timings recorded by the storage decorators and the allocator

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Counter names recorded by this crate
pub mod names {
    /// Read served from a cache
    pub const CACHE_HIT: &str = "cache.hit";
    /// Read delegated past a cache
    pub const CACHE_MISS: &str = "cache.miss";
    /// Keys or queries dropped from a cache
    pub const CACHE_INVALIDATION: &str = "cache.invalidation";
    /// Range reserved from an authoritative counter
    pub const SEQUENCE_REFILL: &str = "sequence.refill";
    /// Unused range tail handed back on close
    pub const SEQUENCE_RELEASE: &str = "sequence.release";
}

/// Shared metrics sink; clones observe the same values
#[derive(Debug, Clone, Default)]
pub struct PersistenceMetrics {
    counters: Arc<RwLock<HashMap<String, u64>>>,
    errors: Arc<RwLock<HashMap<String, u64>>>,
    durations: Arc<RwLock<HashMap<String, Vec<Duration>>>>,
}

impl PersistenceMetrics {
    /// Keep at most this many timings per operation
    const MAX_SAMPLES: usize = 1000;

    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter
    pub async fn increment(&self, name: &str) {
        self.add(name, 1).await;
    }

    /// Add to a counter
    pub async fn add(&self, name: &str, amount: u64) {
        let mut counters = self.counters.write().await;
        *counters.entry(name.to_string()).or_insert(0) += amount;
    }

    /// Record a failed operation
    pub async fn record_error(&self, operation: &str) {
        let mut errors = self.errors.write().await;
        *errors.entry(operation.to_string()).or_insert(0) += 1;
    }

    /// Record operation duration
    pub async fn record_duration(&self, operation: &str, duration: Duration) {
        let mut durations = self.durations.write().await;
        let samples = durations.entry(operation.to_string()).or_default();
        samples.push(duration);
        if samples.len() > Self::MAX_SAMPLES {
            let excess = samples.len() - Self::MAX_SAMPLES;
            samples.drain(..excess);
        }
    }

    /// Get counter value
    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).copied().unwrap_or(0)
    }

    /// Get error count
    pub async fn get_error_count(&self, operation: &str) -> u64 {
        self.errors.read().await.get(operation).copied().unwrap_or(0)
    }

    /// Get average duration for an operation
    pub async fn get_avg_duration(&self, operation: &str) -> Option<Duration> {
        let durations = self.durations.read().await;
        let samples = durations.get(operation).filter(|s| !s.is_empty())?;
        Some(samples.iter().sum::<Duration>() / samples.len() as u32)
    }

    /// Snapshot of every counter
    pub async fn summary(&self) -> MetricsSummary {
        let durations = self.durations.read().await;
        MetricsSummary {
            counters: self.counters.read().await.clone(),
            errors: self.errors.read().await.clone(),
            timings: durations
                .iter()
                .filter(|(_, samples)| !samples.is_empty())
                .map(|(op, samples)| {
                    let max = samples.iter().max().copied().unwrap_or_default();
                    let avg = samples.iter().sum::<Duration>() / samples.len() as u32;
                    (
                        op.clone(),
                        TimingStats {
                            count: samples.len(),
                            avg,
                            max,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Summary of all metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    /// Counter values
    pub counters: HashMap<String, u64>,
    /// Error counts per operation
    pub errors: HashMap<String, u64>,
    /// Timing statistics per operation
    pub timings: HashMap<String, TimingStats>,
}

/// Timing statistics for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingStats {
    /// Number of samples
    pub count: usize,
    /// Average duration
    pub avg: Duration,
    /// Longest duration
    pub max: Duration,
}

/// Timer for measuring operation duration
pub struct MetricsTimer<'a> {
    metrics: &'a PersistenceMetrics,
    operation: String,
    start: Instant,
}

impl<'a> MetricsTimer<'a> {
    /// Start timing an operation
    pub fn start(metrics: &'a PersistenceMetrics, operation: impl Into<String>) -> Self {
        Self {
            metrics,
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Record the duration, counting a failure when `succeeded` is false
    pub async fn finish(self, succeeded: bool) -> Duration {
        let elapsed = self.start.elapsed();
        self.metrics.record_duration(&self.operation, elapsed).await;
        if !succeeded {
            self.metrics.record_error(&self.operation).await;
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters() {
        let metrics = PersistenceMetrics::new();

        metrics.increment(names::CACHE_HIT).await;
        metrics.add(names::CACHE_HIT, 2).await;

        assert_eq!(metrics.get_counter(names::CACHE_HIT).await, 3);
        assert_eq!(metrics.get_counter("nonexistent").await, 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let metrics = PersistenceMetrics::new();
        let clone = metrics.clone();
        clone.increment(names::SEQUENCE_REFILL).await;
        assert_eq!(metrics.get_counter(names::SEQUENCE_REFILL).await, 1);
    }

    #[tokio::test]
    async fn test_timer_records_errors() {
        let metrics = PersistenceMetrics::new();

        MetricsTimer::start(&metrics, "save").finish(true).await;
        MetricsTimer::start(&metrics, "save").finish(false).await;
        metrics.record_duration("load", Duration::from_millis(10)).await;
        metrics.record_duration("load", Duration::from_millis(30)).await;

        assert_eq!(metrics.get_error_count("save").await, 1);
        assert_eq!(
            metrics.get_avg_duration("load").await,
            Some(Duration::from_millis(20))
        );

        let summary = metrics.summary().await;
        assert_eq!(summary.timings["save"].count, 2);
        assert_eq!(summary.timings["load"].max, Duration::from_millis(30));
    }
}
