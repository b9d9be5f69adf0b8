// Copyright 2025 Cowboy AI, LLC.

//! Permission checks around a storage port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

use super::expiring::ExpiringCache;
use super::{Query, StoragePort};
use crate::errors::{PersistenceError, PersistenceResult};
use crate::user::User;

/// Kind of access being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Create a new entry
    Insert,
    /// Replace an existing entry
    Update,
    /// Remove an entry
    Delete,
    /// Observe an entry
    Read,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Insert => write!(f, "insert"),
            Permission::Update => write!(f, "update"),
            Permission::Delete => write!(f, "delete"),
            Permission::Read => write!(f, "read"),
        }
    }
}

/// What a denied keyed operation does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnforcementMode {
    /// Fail the whole call with `PermissionDenied`
    #[default]
    Throw,
    /// Silently drop denied keys
    Filter,
}

/// Configuration for [`AuthorizedPort`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Enforcement mode for keyed operations
    pub mode: EnforcementMode,
}

/// Configuration for [`MemoizingEvaluator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionMemoConfig {
    /// How long a granted check is remembered, in milliseconds
    pub ttl_ms: u64,
    /// Maximum number of remembered checks
    pub capacity: usize,
}

impl Default for PermissionMemoConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 10_000,
            capacity: 1000,
        }
    }
}

/// Decides whether a user may perform an operation on an object
pub trait PermissionEvaluator<T: ?Sized>: Send + Sync {
    /// Check a permission
    fn has_permission(&self, user: &User, object: &T, permission: Permission) -> bool;
}

impl<T: ?Sized, F> PermissionEvaluator<T> for F
where
    F: Fn(&User, &T, Permission) -> bool + Send + Sync,
{
    fn has_permission(&self, user: &User, object: &T, permission: Permission) -> bool {
        self(user, object, permission)
    }
}

/// Permits when any evaluator permits
pub fn any_of<T: ?Sized + 'static>(
    evaluators: Vec<Arc<dyn PermissionEvaluator<T>>>,
) -> Arc<dyn PermissionEvaluator<T>> {
    Arc::new(move |user: &User, object: &T, permission: Permission| {
        evaluators
            .iter()
            .any(|e| e.has_permission(user, object, permission))
    })
}

/// Permits when every evaluator permits
pub fn all_of<T: ?Sized + 'static>(
    evaluators: Vec<Arc<dyn PermissionEvaluator<T>>>,
) -> Arc<dyn PermissionEvaluator<T>> {
    Arc::new(move |user: &User, object: &T, permission: Permission| {
        evaluators
            .iter()
            .all(|e| e.has_permission(user, object, permission))
    })
}

/// Permits everything
pub fn permit_all<T: ?Sized + 'static>() -> Arc<dyn PermissionEvaluator<T>> {
    Arc::new(|_: &User, _: &T, _: Permission| true)
}

/// Permits nothing
pub fn deny_all<T: ?Sized + 'static>() -> Arc<dyn PermissionEvaluator<T>> {
    Arc::new(|_: &User, _: &T, _: Permission| false)
}

/// Permits application admins and superusers
pub fn app_admin<T: ?Sized + 'static>() -> Arc<dyn PermissionEvaluator<T>> {
    Arc::new(|user: &User, _: &T, _: Permission| user.is_app_admin())
}

/// Role grants on objects identified by `O`
///
/// Domain modules implement [`PermissionEvaluator`] on top of it by mapping
/// their keys to an object id and the user to its roles.
pub struct GrantTable<O> {
    grants: RwLock<HashSet<(String, O, Permission)>>,
}

impl<O> Default for GrantTable<O> {
    fn default() -> Self {
        Self {
            grants: RwLock::new(HashSet::new()),
        }
    }
}

impl<O: Clone + Eq + Hash> GrantTable<O> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a permission on an object to a role
    pub fn grant(
        &self,
        role: impl Into<String>,
        object: O,
        permission: Permission,
    ) -> PersistenceResult<()> {
        self.grants
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("grant table"))?
            .insert((role.into(), object, permission));
        Ok(())
    }

    /// Grant several permissions at once
    pub fn grant_all(
        &self,
        role: &str,
        object: O,
        permissions: &[Permission],
    ) -> PersistenceResult<()> {
        for permission in permissions {
            self.grant(role, object.clone(), *permission)?;
        }
        Ok(())
    }

    /// Withdraw a grant
    pub fn revoke(&self, role: &str, object: &O, permission: Permission) -> PersistenceResult<()> {
        self.grants
            .write()
            .map_err(|_| PersistenceError::LockPoisoned("grant table"))?
            .remove(&(role.to_string(), object.clone(), permission));
        Ok(())
    }

    /// Whether a role holds a permission; a poisoned table grants nothing
    pub fn is_granted(&self, role: &str, object: &O, permission: Permission) -> bool {
        self.grants
            .read()
            .map(|g| g.contains(&(role.to_string(), object.clone(), permission)))
            .unwrap_or(false)
    }

    /// Whether any of the roles holds a permission
    pub fn any_granted<'a>(
        &self,
        mut roles: impl Iterator<Item = &'a str>,
        object: &O,
        permission: Permission,
    ) -> bool {
        roles.any(|role| self.is_granted(role, object, permission))
    }
}

/// Evaluator remembering granted checks for a fixed time
///
/// Denials are always re-evaluated. Call [`MemoizingEvaluator::invalidate_all`]
/// after changing grants to stop serving remembered results.
pub struct MemoizingEvaluator<T: Clone + Eq + Hash> {
    inner: Arc<dyn PermissionEvaluator<T>>,
    memo: ExpiringCache<(User, T, Permission), bool>,
}

impl<T: Clone + Eq + Hash + Send + Sync> MemoizingEvaluator<T> {
    /// Wrap an evaluator
    pub fn new(
        inner: Arc<dyn PermissionEvaluator<T>>,
        config: &PermissionMemoConfig,
    ) -> PersistenceResult<Self> {
        let capacity = NonZeroUsize::new(config.capacity).ok_or_else(|| {
            PersistenceError::InvalidConfiguration("capacity must be greater than zero".into())
        })?;
        Ok(Self {
            inner,
            memo: ExpiringCache::new(capacity, Duration::from_millis(config.ttl_ms)),
        })
    }

    /// Forget every remembered check
    pub fn invalidate_all(&self) {
        self.memo.clear();
    }
}

impl<T: Clone + Eq + Hash + Send + Sync> PermissionEvaluator<T> for MemoizingEvaluator<T> {
    fn has_permission(&self, user: &User, object: &T, permission: Permission) -> bool {
        let key = (user.clone(), object.clone(), permission);
        if self.memo.get(&key).unwrap_or(false) {
            return true;
        }
        let permitted = self.inner.has_permission(user, object, permission);
        if permitted {
            self.memo.insert(key, true);
        }
        permitted
    }
}

/// Storage port decorator enforcing permissions
///
/// The mode governs keyed operations only. `get_all` and
/// `get_by_specification` always drop entries the caller may not read.
pub struct AuthorizedPort<P: StoragePort> {
    inner: P,
    keys: Arc<dyn PermissionEvaluator<P::Key>>,
    values: Option<Arc<dyn PermissionEvaluator<P::Value>>>,
    mode: EnforcementMode,
}

impl<P: StoragePort> AuthorizedPort<P> {
    /// Wrap a port with a key evaluator
    pub fn new(inner: P, keys: Arc<dyn PermissionEvaluator<P::Key>>, mode: EnforcementMode) -> Self {
        Self {
            inner,
            keys,
            values: None,
            mode,
        }
    }

    /// Wrap a port using a configuration
    pub fn from_config(
        inner: P,
        keys: Arc<dyn PermissionEvaluator<P::Key>>,
        config: &AuthorizationConfig,
    ) -> Self {
        Self::new(inner, keys, config.mode)
    }

    /// Also check values
    pub fn with_value_evaluator(mut self, values: Arc<dyn PermissionEvaluator<P::Value>>) -> Self {
        self.values = Some(values);
        self
    }

    /// Enforcement mode
    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    /// The wrapped port
    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn permits_key(&self, user: &User, key: &P::Key, permission: Permission) -> bool {
        self.keys.has_permission(user, key, permission)
    }

    fn permits_value(&self, user: &User, value: &P::Value, permission: Permission) -> bool {
        self.values
            .as_ref()
            .map_or(true, |e| e.has_permission(user, value, permission))
    }

    fn permits_entry(
        &self,
        user: &User,
        key: &P::Key,
        value: &P::Value,
        permission: Permission,
    ) -> bool {
        self.permits_key(user, key, permission) && self.permits_value(user, value, permission)
    }

    fn denied(user: &User, permission: Permission, target: &P::Key) -> PersistenceError {
        PersistenceError::PermissionDenied {
            permission,
            user: user.username.clone(),
            target: format!("{target:?}"),
        }
    }

    /// Apply the mode to a batch of entries
    fn enforce_entries(
        &self,
        entries: Vec<(P::Key, P::Value)>,
        user: &User,
        permission: Permission,
    ) -> PersistenceResult<Vec<(P::Key, P::Value)>> {
        let total = entries.len();
        let mut permitted = Vec::with_capacity(total);
        for (key, value) in entries {
            if self.permits_entry(user, &key, &value, permission) {
                permitted.push((key, value));
            } else if self.mode == EnforcementMode::Throw {
                return Err(Self::denied(user, permission, &key));
            }
        }
        if permitted.len() < total {
            debug!(
                "Dropped {} of {} entries denied {} to {}",
                total - permitted.len(),
                total,
                permission,
                user.username
            );
        }
        Ok(permitted)
    }

    /// Entries the caller may read, regardless of mode
    fn readable(
        &self,
        entries: Vec<(P::Key, P::Value)>,
        user: &User,
    ) -> Vec<(P::Key, P::Value)> {
        entries
            .into_iter()
            .filter(|(k, v)| self.permits_entry(user, k, v, Permission::Read))
            .collect()
    }
}

#[async_trait]
impl<P: StoragePort> StoragePort for AuthorizedPort<P> {
    type Key = P::Key;
    type Value = P::Value;
    type Criterion = P::Criterion;

    async fn insert_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        let permitted = self.enforce_entries(entries, user, Permission::Insert)?;
        if permitted.is_empty() {
            return Ok(());
        }
        self.inner.insert_many(permitted, user).await
    }

    async fn update_many(
        &self,
        entries: Vec<(Self::Key, Self::Value)>,
        user: &User,
    ) -> PersistenceResult<()> {
        let permitted = self.enforce_entries(entries, user, Permission::Update)?;
        if permitted.is_empty() {
            return Ok(());
        }
        self.inner.update_many(permitted, user).await
    }

    async fn delete_many(&self, keys: Vec<Self::Key>, user: &User) -> PersistenceResult<()> {
        let mut permitted = Vec::with_capacity(keys.len());
        for key in keys {
            if self.permits_key(user, &key, Permission::Delete) {
                permitted.push(key);
            } else if self.mode == EnforcementMode::Throw {
                return Err(Self::denied(user, Permission::Delete, &key));
            }
        }

        // stored values are checked when a value evaluator is configured
        if self.values.is_some() && !permitted.is_empty() {
            let stored = self.inner.get_by_keys(&permitted, user).await?;
            let mut refused = HashSet::new();
            for (key, value) in &stored {
                if !self.permits_value(user, value, Permission::Delete) {
                    if self.mode == EnforcementMode::Throw {
                        return Err(Self::denied(user, Permission::Delete, key));
                    }
                    refused.insert(key.clone());
                }
            }
            permitted.retain(|k| !refused.contains(k));
        }

        if permitted.is_empty() {
            return Ok(());
        }
        self.inner.delete_many(permitted, user).await
    }

    async fn exists(&self, key: &Self::Key, user: &User) -> PersistenceResult<bool> {
        if !self.permits_key(user, key, Permission::Read) {
            return match self.mode {
                EnforcementMode::Throw => Err(Self::denied(user, Permission::Read, key)),
                EnforcementMode::Filter => Ok(false),
            };
        }
        self.inner.exists(key, user).await
    }

    async fn get(&self, key: &Self::Key, user: &User) -> PersistenceResult<Option<Self::Value>> {
        if !self.permits_key(user, key, Permission::Read) {
            return match self.mode {
                EnforcementMode::Throw => Err(Self::denied(user, Permission::Read, key)),
                EnforcementMode::Filter => Ok(None),
            };
        }
        match self.inner.get(key, user).await? {
            Some(value) if !self.permits_value(user, &value, Permission::Read) => match self.mode {
                EnforcementMode::Throw => Err(Self::denied(user, Permission::Read, key)),
                EnforcementMode::Filter => Ok(None),
            },
            found => Ok(found),
        }
    }

    async fn get_all(&self, user: &User) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let entries = self.inner.get_all(user).await?;
        Ok(self.readable(entries, user))
    }

    async fn get_by_keys(
        &self,
        keys: &[Self::Key],
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let mut permitted = Vec::with_capacity(keys.len());
        for key in keys {
            if self.permits_key(user, key, Permission::Read) {
                permitted.push(key.clone());
            } else if self.mode == EnforcementMode::Throw {
                return Err(Self::denied(user, Permission::Read, key));
            }
        }
        if permitted.is_empty() {
            return Ok(Vec::new());
        }
        let entries = self.inner.get_by_keys(&permitted, user).await?;
        if self.values.is_none() {
            return Ok(entries);
        }
        self.enforce_entries(entries, user, Permission::Read)
    }

    async fn get_by_specification(
        &self,
        query: &Query<Self::Criterion>,
        user: &User,
    ) -> PersistenceResult<Vec<(Self::Key, Self::Value)>> {
        let entries = self.inner.get_by_specification(query, user).await?;
        Ok(self.readable(entries, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specification::leaf;
    use crate::specification::test_support::Num;
    use crate::storage::MemoryStoragePort;
    use crate::user::AppRole;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn user() -> User {
        User::new("alice", AppRole::User)
    }

    fn odd_keys() -> Arc<dyn PermissionEvaluator<u32>> {
        Arc::new(|_: &User, key: &u32, _: Permission| key % 2 == 1)
    }

    async fn seeded(mode: EnforcementMode) -> AuthorizedPort<MemoryStoragePort<Num>> {
        let raw = MemoryStoragePort::new("numbers");
        raw.insert_many((1..=6).map(|k| (k, k as i64 * 10)).collect(), &user())
            .await
            .unwrap();
        AuthorizedPort::new(raw, odd_keys(), mode)
    }

    #[tokio::test]
    async fn test_filter_mode_drops_denied_reads() {
        let port = seeded(EnforcementMode::Filter).await;

        let found = port.get_by_keys(&[1, 2, 3, 4], &user()).await.unwrap();
        assert_eq!(found, vec![(1, 10), (3, 30)]);
        assert_eq!(port.get(&2, &user()).await.unwrap(), None);
        assert!(!port.exists(&2, &user()).await.unwrap());
        assert!(port.exists(&3, &user()).await.unwrap());
    }

    #[tokio::test]
    async fn test_throw_mode_rejects_whole_batch() {
        let port = seeded(EnforcementMode::Throw).await;

        let err = port
            .insert_many(vec![(7, 70), (8, 80)], &user())
            .await
            .unwrap_err();
        assert!(err.is_permission_denied());
        assert_eq!(
            err.to_string(),
            "Permission denied: alice may not insert 8"
        );
        assert!(!port.inner().exists(&7, &user()).await.unwrap());

        assert!(port.get(&2, &user()).await.unwrap_err().is_permission_denied());
        assert!(port.exists(&2, &user()).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_mode_applies_permitted_subset() {
        let port = seeded(EnforcementMode::Filter).await;
        port.delete_many(vec![1, 2, 3], &user()).await.unwrap();

        let remaining: Vec<_> = port
            .inner()
            .get_all(&user())
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(remaining, vec![2, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_enumeration_filtered_in_both_modes() {
        for mode in [EnforcementMode::Throw, EnforcementMode::Filter] {
            let port = seeded(mode).await;
            let all: Vec<_> = port
                .get_all(&user())
                .await
                .unwrap()
                .into_iter()
                .map(|(k, _)| k)
                .collect();
            assert_eq!(all, vec![1, 3, 5]);

            let even_values = port
                .get_by_specification(&Query::new(leaf(Num::Even)), &user())
                .await
                .unwrap();
            assert_eq!(even_values.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_value_evaluator_checks_incoming_update() {
        let port = seeded(EnforcementMode::Throw)
            .await
            .with_value_evaluator(Arc::new(|_: &User, v: &i64, _: Permission| *v < 100));

        port.update_one(1, 99, &user()).await.unwrap();
        assert!(port
            .update_one(1, 500, &user())
            .await
            .unwrap_err()
            .is_permission_denied());
        assert_eq!(port.get(&1, &user()).await.unwrap(), Some(99));
    }

    #[test]
    fn test_combinators() {
        let anyone = any_of(vec![app_admin::<u32>(), odd_keys()]);
        let both = all_of(vec![app_admin::<u32>(), odd_keys()]);
        let admin = User::new("root", AppRole::Admin);

        assert!(anyone.has_permission(&user(), &1, Permission::Read));
        assert!(anyone.has_permission(&admin, &2, Permission::Read));
        assert!(!both.has_permission(&user(), &1, Permission::Read));
        assert!(both.has_permission(&admin, &1, Permission::Read));
        assert!(permit_all::<u32>().has_permission(&user(), &2, Permission::Delete));
        assert!(!deny_all::<u32>().has_permission(&admin, &1, Permission::Read));
    }

    #[test]
    fn test_grant_table() {
        let table = GrantTable::new();
        table
            .grant_all("editor", 7u32, &[Permission::Read, Permission::Update])
            .unwrap();

        assert!(table.is_granted("editor", &7, Permission::Update));
        assert!(!table.is_granted("editor", &7, Permission::Delete));
        assert!(table.any_granted(["reader", "editor"].into_iter(), &7, Permission::Read));

        table.revoke("editor", &7, Permission::Update).unwrap();
        assert!(!table.is_granted("editor", &7, Permission::Update));
    }

    #[test]
    fn test_memoizing_evaluator_remembers_grants() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner: Arc<dyn PermissionEvaluator<u32>> =
            Arc::new(move |_: &User, key: &u32, _: Permission| {
                counter.fetch_add(1, Ordering::SeqCst);
                *key == 1
            });
        let memo = MemoizingEvaluator::new(inner, &PermissionMemoConfig::default()).unwrap();

        assert!(memo.has_permission(&user(), &1, Permission::Read));
        assert!(memo.has_permission(&user(), &1, Permission::Read));
        assert!(!memo.has_permission(&user(), &2, Permission::Read));
        assert!(!memo.has_permission(&user(), &2, Permission::Read));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        memo.invalidate_all();
        assert!(memo.has_permission(&user(), &1, Permission::Read));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
