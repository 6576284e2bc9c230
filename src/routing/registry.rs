//! Subscription registry: topic pattern to (QoS, handler)
//!
//! Each pattern maps to exactly one subscription. Replacing a subscription
//! swaps the whole entry under the write lock, so a reader sees either the
//! old handler or the new one, never both and never neither.

use super::handler::ErasedHandler;
use crate::protocol::{QoS, TopicError, TopicPattern};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// A registered subscription
#[derive(Clone)]
pub struct Subscription {
    pattern: TopicPattern,
    qos: QoS,
    handler: Arc<dyn ErasedHandler>,
}

impl Subscription {
    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn handler(&self) -> &Arc<dyn ErasedHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .field("qos", &self.qos)
            .field("event", &self.handler.event_kind())
            .finish()
    }
}

/// Concurrent map of subscriptions, shared by the subscribe API and dispatch
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<TopicPattern, Arc<Subscription>>>,
    revision: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or atomically replace the subscription for `pattern`
    ///
    /// Returns the replaced subscription, if any.
    pub async fn subscribe(
        &self,
        pattern: &str,
        qos: QoS,
        handler: Arc<dyn ErasedHandler>,
    ) -> Result<Option<Arc<Subscription>>, TopicError> {
        let pattern = TopicPattern::parse(pattern)?;
        let subscription = Arc::new(Subscription {
            pattern: pattern.clone(),
            qos,
            handler,
        });

        let replaced = self.entries.write().await.insert(pattern, subscription);
        self.revision.fetch_add(1, Ordering::Release);
        if let Some(previous) = &replaced {
            debug!(pattern = %previous.pattern, "Replaced subscription handler");
        }
        Ok(replaced)
    }

    /// Remove the subscription for `pattern`; no-op if absent
    pub async fn unsubscribe(&self, pattern: &TopicPattern) -> Option<Arc<Subscription>> {
        let removed = self.entries.write().await.remove(pattern);
        if removed.is_some() {
            self.revision.fetch_add(1, Ordering::Release);
        }
        removed
    }

    /// Current subscription for exactly `pattern`
    pub async fn get(&self, pattern: &TopicPattern) -> Option<Arc<Subscription>> {
        self.entries.read().await.get(pattern).cloned()
    }

    /// Most specific subscription whose pattern matches `topic`
    pub async fn resolve(&self, topic: &str) -> Option<Arc<Subscription>> {
        self.entries
            .read()
            .await
            .values()
            .filter(|subscription| subscription.pattern.matches(topic))
            .max_by(|a, b| a.pattern.cmp_specificity(&b.pattern))
            .cloned()
    }

    pub async fn patterns(&self) -> Vec<TopicPattern> {
        let mut patterns: Vec<_> = self.entries.read().await.keys().cloned().collect();
        patterns.sort();
        patterns
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every subscription, returning what was registered
    pub async fn clear(&self) -> Vec<Arc<Subscription>> {
        let removed: Vec<_> = self
            .entries
            .write()
            .await
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        if !removed.is_empty() {
            self.revision.fetch_add(1, Ordering::Release);
        }
        removed
    }

    /// Bumped on every change to the set of subscriptions
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UserRegistrationEvent;
    use crate::routing::handler::{erase, handler_fn};

    fn noop() -> Arc<dyn ErasedHandler> {
        erase::<UserRegistrationEvent, _>(handler_fn(|_event: UserRegistrationEvent| async {
            Ok(())
        }))
    }

    async fn registry_with(patterns: &[&str]) -> SubscriptionRegistry {
        let registry = SubscriptionRegistry::new();
        for pattern in patterns {
            registry
                .subscribe(pattern, QoS::AtMostOnce, noop())
                .await
                .unwrap();
        }
        registry
    }

    async fn resolved(registry: &SubscriptionRegistry, topic: &str) -> Option<String> {
        registry
            .resolve(topic)
            .await
            .map(|s| s.pattern().as_str().to_string())
    }

    #[tokio::test]
    async fn test_subscribe_rejects_malformed_patterns() {
        let registry = SubscriptionRegistry::new();
        for bad in ["", "a/#/b", "a+/b", "a/b#", "a/\0"] {
            assert!(
                registry.subscribe(bad, QoS::AtMostOnce, noop()).await.is_err(),
                "{bad:?} accepted"
            );
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces() {
        let registry = SubscriptionRegistry::new();

        let first = registry
            .subscribe("User/Registration/Add", QoS::AtMostOnce, noop())
            .await
            .unwrap();
        assert!(first.is_none());

        let replaced = registry
            .subscribe("User/Registration/Add", QoS::AtLeastOnce, noop())
            .await
            .unwrap();
        assert_eq!(replaced.map(|s| s.qos()), Some(QoS::AtMostOnce));
        assert_eq!(registry.len().await, 1);

        let current = registry.resolve("User/Registration/Add").await.unwrap();
        assert_eq!(current.qos(), QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_unsubscribe_absent_is_noop() {
        let registry = registry_with(&["a/b"]).await;
        let absent = TopicPattern::parse("a/c").unwrap();

        assert!(registry.unsubscribe(&absent).await.is_none());
        assert_eq!(registry.len().await, 1);

        let present = TopicPattern::parse("a/b").unwrap();
        assert!(registry.unsubscribe(&present).await.is_some());
        assert!(registry.resolve("a/b").await.is_none());
    }

    #[tokio::test]
    async fn test_revision_tracks_changes() {
        let registry = SubscriptionRegistry::new();
        let start = registry.revision();

        registry.subscribe("a/b", QoS::AtMostOnce, noop()).await.unwrap();
        let after_subscribe = registry.revision();
        assert!(after_subscribe > start);

        let absent = TopicPattern::parse("a/c").unwrap();
        registry.unsubscribe(&absent).await;
        assert_eq!(registry.revision(), after_subscribe);

        registry.clear().await;
        assert!(registry.revision() > after_subscribe);
    }

    #[tokio::test]
    async fn test_resolve_prefers_most_specific() {
        let registry =
            registry_with(&["#", "User/#", "User/+/Add", "User/Registration/Add", "+/+/Add"])
                .await;

        assert_eq!(
            resolved(&registry, "User/Registration/Add").await.as_deref(),
            Some("User/Registration/Add")
        );
        assert_eq!(
            resolved(&registry, "User/Login/Add").await.as_deref(),
            Some("User/+/Add")
        );
        assert_eq!(
            resolved(&registry, "User/Login/Remove").await.as_deref(),
            Some("User/#")
        );
        assert_eq!(
            resolved(&registry, "Order/Line/Add").await.as_deref(),
            Some("+/+/Add")
        );
        assert_eq!(resolved(&registry, "Order").await.as_deref(), Some("#"));
    }

    #[tokio::test]
    async fn test_resolve_tie_break_is_deterministic() {
        // same literal prefix and level count: smallest string wins
        let registry = registry_with(&["x/+/c/+", "x/+/+/d"]).await;
        for _ in 0..10 {
            assert_eq!(
                resolved(&registry, "x/y/c/d").await.as_deref(),
                Some("x/+/+/d")
            );
        }
    }

    #[tokio::test]
    async fn test_resolve_without_match() {
        let registry = registry_with(&["a/+"]).await;
        assert!(registry.resolve("a/b/c").await.is_none());
        assert!(registry.resolve("$SYS/a").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_and_resolve() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..20 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let pattern = format!("load/{i}/+");
                registry
                    .subscribe(&pattern, QoS::AtMostOnce, noop())
                    .await
                    .unwrap();
                registry.resolve(&format!("load/{i}/x")).await.is_some()
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(registry.patterns().await.len(), 20);
    }
}
