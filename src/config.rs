// Copyright 2025 Cowboy AI, LLC.

//! Aggregated configuration for the persistence components

use serde::{Deserialize, Serialize};

use crate::errors::{PersistenceError, PersistenceResult};
use crate::sequence::SequenceConfig;
use crate::storage::{AuthorizationConfig, CacheConfig, PermissionMemoConfig};

/// Configuration of every configurable component; missing fields default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Read cache
    pub cache: CacheConfig,
    /// Authorization decorator
    pub authorization: AuthorizationConfig,
    /// Batched sequence allocator
    pub sequence: SequenceConfig,
    /// Permission check memo
    pub permission_memo: PermissionMemoConfig,
}

impl PersistenceConfig {
    /// Load from JSON and validate
    pub fn from_json(json: &str) -> PersistenceResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components would refuse at build time
    pub fn validate(&self) -> PersistenceResult<()> {
        if self.cache.key_capacity == 0 || self.cache.specification_capacity == 0 {
            return Err(PersistenceError::InvalidConfiguration(
                "cache capacities must be greater than zero".into(),
            ));
        }
        if self.sequence.batch_size < 1 {
            return Err(PersistenceError::InvalidConfiguration(
                "sequence.batch_size must be at least 1".into(),
            ));
        }
        if self.permission_memo.capacity == 0 {
            return Err(PersistenceError::InvalidConfiguration(
                "permission_memo.capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
