// Copyright 2025 Cowboy AI, LLC.

//! Units of work spanning several storage ports

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::error;
use uuid::Uuid;

use crate::errors::PersistenceResult;

/// Identifier of an open unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource taking part in a unit of work
#[async_trait]
pub trait TransactionParticipant: Send + Sync {
    /// Start tracking changes
    async fn begin(&self, transaction: TransactionId) -> PersistenceResult<()>;
    /// Make changes permanent
    async fn commit(&self, transaction: TransactionId) -> PersistenceResult<()>;
    /// Discard changes made since `begin`
    async fn rollback(&self, transaction: TransactionId) -> PersistenceResult<()>;
}

/// Open unit of work
///
/// Holds the manager's serialization guard until committed or rolled back.
pub struct Transaction {
    id: TransactionId,
    _guard: OwnedMutexGuard<()>,
}

impl Transaction {
    /// Identifier
    pub fn id(&self) -> TransactionId {
        self.id
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

/// Opens, commits and rolls back units of work
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> PersistenceResult<Transaction>;
    /// Commit a unit of work
    async fn commit(&self, transaction: Transaction) -> PersistenceResult<()>;
    /// Roll a unit of work back
    async fn rollback(&self, transaction: Transaction) -> PersistenceResult<()>;
}

#[async_trait]
impl<T: TransactionManager + ?Sized> TransactionManager for Arc<T> {
    async fn begin(&self) -> PersistenceResult<Transaction> {
        (**self).begin().await
    }

    async fn commit(&self, transaction: Transaction) -> PersistenceResult<()> {
        (**self).commit(transaction).await
    }

    async fn rollback(&self, transaction: Transaction) -> PersistenceResult<()> {
        (**self).rollback(transaction).await
    }
}

/// Snapshot-based manager for in-memory participants
///
/// One unit of work runs at a time.
pub struct MemoryTransactionManager {
    participants: Vec<Arc<dyn TransactionParticipant>>,
    lock: Arc<Mutex<()>>,
}

impl MemoryTransactionManager {
    /// Create a manager over a set of participants
    pub fn new(participants: Vec<Arc<dyn TransactionParticipant>>) -> Self {
        Self {
            participants,
            lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl TransactionManager for MemoryTransactionManager {
    async fn begin(&self) -> PersistenceResult<Transaction> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let id = TransactionId::new();
        for (started, participant) in self.participants.iter().enumerate() {
            if let Err(e) = participant.begin(id).await {
                for opened in &self.participants[..started] {
                    if let Err(undo) = opened.rollback(id).await {
                        error!("Failed to release participant of transaction {id}: {undo}");
                    }
                }
                return Err(e);
            }
        }
        Ok(Transaction {
            id,
            _guard: guard,
        })
    }

    async fn commit(&self, transaction: Transaction) -> PersistenceResult<()> {
        let mut first_error = None;
        for participant in &self.participants {
            if let Err(e) = participant.commit(transaction.id).await {
                error!("Commit of transaction {} failed: {e}", transaction.id);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn rollback(&self, transaction: Transaction) -> PersistenceResult<()> {
        let mut first_error = None;
        for participant in &self.participants {
            if let Err(e) = participant.rollback(transaction.id).await {
                error!("Rollback of transaction {} failed: {e}", transaction.id);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        begun: AtomicUsize,
        committed: AtomicUsize,
        rolled_back: AtomicUsize,
        fail_begin: bool,
    }

    #[async_trait]
    impl TransactionParticipant for Recorder {
        async fn begin(&self, _transaction: TransactionId) -> PersistenceResult<()> {
            if self.fail_begin {
                return Err(crate::errors::PersistenceError::Transaction("refused".into()));
            }
            self.begun.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn commit(&self, _transaction: TransactionId) -> PersistenceResult<()> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self, _transaction: TransactionId) -> PersistenceResult<()> {
            self.rolled_back.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_reaches_every_participant() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let participants: Vec<Arc<dyn TransactionParticipant>> = vec![first.clone(), second.clone()];
        let manager = MemoryTransactionManager::new(participants);

        let tx = manager.begin().await.unwrap();
        manager.commit(tx).await.unwrap();

        assert_eq!(first.committed.load(Ordering::SeqCst), 1);
        assert_eq!(second.committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_begin_releases_opened_participants() {
        let opened = Arc::new(Recorder::default());
        let refusing = Arc::new(Recorder {
            fail_begin: true,
            ..Recorder::default()
        });
        let participants: Vec<Arc<dyn TransactionParticipant>> = vec![opened.clone(), refusing];
        let manager = MemoryTransactionManager::new(participants);

        assert!(manager.begin().await.is_err());
        assert_eq!(opened.rolled_back.load(Ordering::SeqCst), 1);

        // the guard is released with the failed begin
        let retry = tokio::time::timeout(std::time::Duration::from_secs(1), manager.begin()).await;
        assert!(retry.is_ok());
    }
}
