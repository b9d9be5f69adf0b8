// Copyright 2025 Cowboy AI, LLC.

//! Change notifications used to invalidate caches across instances

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;
use uuid::Uuid;

/// Keys affected by a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeScope<K> {
    /// Only these keys changed
    Keys(Vec<K>),
    /// Anything may have changed
    All,
}

/// Message published after a successful write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification<K> {
    /// Entity type the keys belong to
    pub entity_type: String,
    /// Affected keys
    pub scope: ChangeScope<K>,
    /// Instance that performed the write
    pub origin: Uuid,
}

/// Callback invoked for each delivered notification
pub type ChangeHandler<K> = Arc<dyn Fn(&ChangeNotification<K>) + Send + Sync>;

/// Handle returned by [`ChangeSubscription::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publishing side of the change bus; delivery is fire-and-forget
pub trait ChangeNotifier<K>: Send + Sync {
    /// Publish a notification
    fn publish(&self, notification: ChangeNotification<K>);
}

/// Subscribing side of the change bus
pub trait ChangeSubscription<K>: Send + Sync {
    /// Register a handler for an entity type
    fn subscribe(&self, entity_type: &str, handler: ChangeHandler<K>) -> SubscriptionId;
    /// Remove a handler; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Synchronous in-process bus implementing both sides
pub struct InProcessChangeBus<K> {
    next_id: AtomicU64,
    handlers: RwLock<IndexMap<u64, (String, ChangeHandler<K>)>>,
}

impl<K> Default for InProcessChangeBus<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> InProcessChangeBus<K> {
    /// Create a bus without subscribers
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            handlers: RwLock::new(IndexMap::new()),
        }
    }

    /// Number of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }
}

impl<K: Send + Sync> ChangeNotifier<K> for InProcessChangeBus<K> {
    fn publish(&self, notification: ChangeNotification<K>) {
        // handlers run without the lock held so they may (un)subscribe
        let targets: Vec<ChangeHandler<K>> = match self.handlers.read() {
            Ok(handlers) => handlers
                .values()
                .filter(|(entity_type, _)| *entity_type == notification.entity_type)
                .map(|(_, handler)| Arc::clone(handler))
                .collect(),
            Err(_) => {
                warn!(
                    "Change bus lock poisoned, dropping notification for {}",
                    notification.entity_type
                );
                return;
            }
        };
        for handler in targets {
            handler(&notification);
        }
    }
}

impl<K: Send + Sync> ChangeSubscription<K> for InProcessChangeBus<K> {
    fn subscribe(&self, entity_type: &str, handler: ChangeHandler<K>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.handlers.write() {
            Ok(mut handlers) => {
                handlers.insert(id, (entity_type.to_string(), handler));
            }
            Err(_) => warn!("Change bus lock poisoned, subscription {id} not registered"),
        }
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.shift_remove(&id.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_publish_reaches_matching_subscribers_only() {
        let bus = InProcessChangeBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = bus.subscribe(
            "node",
            Arc::new(move |n: &ChangeNotification<u32>| {
                sink.lock().unwrap().push(n.scope.clone());
            }),
        );
        bus.subscribe("graph", Arc::new(|_: &ChangeNotification<u32>| panic!("wrong type")));

        bus.publish(ChangeNotification {
            entity_type: "node".into(),
            scope: ChangeScope::Keys(vec![1, 2]),
            origin: Uuid::new_v4(),
        });
        assert_eq!(*seen.lock().unwrap(), vec![ChangeScope::Keys(vec![1, 2])]);

        bus.unsubscribe(id);
        bus.publish(ChangeNotification {
            entity_type: "node".into(),
            scope: ChangeScope::All,
            origin: Uuid::new_v4(),
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.subscriber_count(), 1);
    }
}
