use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::broker::Broker;
use crate::shared::RelayError;

/// Local interest in one broker topic
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEntry {
    pub topic: String,
    pub ref_count: usize,
    pub last_touched: DateTime<Utc>,
}

impl SubscriptionEntry {
    fn new(topic: String, now: DateTime<Utc>) -> Self {
        Self {
            topic,
            ref_count: 1,
            last_touched: now,
        }
    }

    /// No local interest left and untouched for longer than `idle_threshold`
    fn is_reclaimable(&self, now: DateTime<Utc>, idle_threshold: Duration) -> bool {
        self.ref_count == 0
            && now
                .signed_duration_since(self.last_touched)
                .to_std()
                .is_ok_and(|idle| idle > idle_threshold)
    }
}

/// Keeps the node's broker subscriptions equal to the topics with local interest
///
/// Releasing a topic never unsubscribes it directly: entries at zero
/// references stay subscribed until [`SubscriptionController::sweep`] finds
/// them idle, which absorbs bursty interest without broker churn.
///
/// The entry map lock is held across the broker call for the topic being
/// changed, so a broker subscription exists exactly when its entry does.
pub struct SubscriptionController {
    broker: Arc<dyn Broker>,
    max_subscriptions: usize,
    entries: Mutex<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionController {
    pub fn new(broker: Arc<dyn Broker>, max_subscriptions: usize) -> Self {
        Self {
            broker,
            max_subscriptions,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_subscriptions
    }

    /// Registers one more unit of local interest in `topic`
    #[instrument(skip(self))]
    pub async fn subscribe(&self, topic: &str) -> Result<(), RelayError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(topic) {
            entry.ref_count += 1;
            entry.last_touched = now;
            debug!(topic = %topic, ref_count = entry.ref_count, "Subscription reference added");
            return Ok(());
        }

        if entries.len() >= self.max_subscriptions {
            self.evict_one(&mut entries, topic).await?;
        }

        self.broker.subscribe(topic).await?;
        entries.insert(topic.to_string(), SubscriptionEntry::new(topic.to_string(), now));

        info!(topic = %topic, "Subscribed to broker topic");
        Ok(())
    }

    /// Drops one unit of local interest in `topic`
    #[instrument(skip(self))]
    pub async fn release(&self, topic: &str) -> Result<(), RelayError> {
        let mut entries = self.entries.lock().await;

        match entries.get_mut(topic) {
            Some(entry) if entry.ref_count > 0 => {
                entry.ref_count -= 1;
                entry.last_touched = Utc::now();
                debug!(topic = %topic, ref_count = entry.ref_count, "Subscription reference released");
                Ok(())
            }
            _ => {
                warn!(topic = %topic, "Release without a matching subscribe");
                Err(RelayError::InvalidRelease {
                    topic: topic.to_string(),
                })
            }
        }
    }

    /// Refreshes the idle timer of `topic`; returns whether it is subscribed
    pub async fn touch(&self, topic: &str) -> bool {
        let mut entries = self.entries.lock().await;

        match entries.get_mut(topic) {
            Some(entry) => {
                entry.last_touched = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Unsubscribes every idle, unreferenced topic and returns the reclaimed topics
    ///
    /// A topic whose unsubscribe fails keeps its entry and is retried on the
    /// next sweep.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>, idle_threshold: Duration) -> Vec<String> {
        let mut entries = self.entries.lock().await;

        let idle: Vec<String> = entries
            .values()
            .filter(|entry| entry.is_reclaimable(now, idle_threshold))
            .map(|entry| entry.topic.clone())
            .collect();

        if idle.is_empty() {
            debug!("No idle subscriptions to reclaim");
            return Vec::new();
        }

        let mut reclaimed = Vec::with_capacity(idle.len());

        for topic in idle {
            match self.broker.unsubscribe(&topic).await {
                Ok(()) => {
                    entries.remove(&topic);
                    info!(topic = %topic, "Reclaimed idle subscription");
                    reclaimed.push(topic);
                }
                Err(e) => {
                    warn!(
                        topic = %topic,
                        error = %e,
                        "Failed to unsubscribe idle topic"
                    );
                }
            }
        }

        reclaimed
    }

    /// Makes room for `incoming` by unsubscribing the least recently touched
    /// unreferenced entry
    async fn evict_one(
        &self,
        entries: &mut HashMap<String, SubscriptionEntry>,
        incoming: &str,
    ) -> Result<(), RelayError> {
        let victim = entries
            .values()
            .filter(|entry| entry.ref_count == 0)
            .min_by_key(|entry| entry.last_touched)
            .map(|entry| entry.topic.clone());

        let Some(victim) = victim else {
            warn!(
                topic = %incoming,
                limit = self.max_subscriptions,
                "Subscription limit reached with no idle topic to evict"
            );
            return Err(RelayError::CapacityExceeded {
                topic: incoming.to_string(),
                limit: self.max_subscriptions,
            });
        };

        self.broker.unsubscribe(&victim).await?;
        entries.remove(&victim);

        info!(evicted = %victim, topic = %incoming, "Evicted idle subscription to make room");
        Ok(())
    }

    pub async fn ref_count(&self, topic: &str) -> Option<usize> {
        self.entries.lock().await.get(topic).map(|e| e.ref_count)
    }

    pub async fn entry(&self, topic: &str) -> Option<SubscriptionEntry> {
        self.entries.lock().await.get(topic).cloned()
    }

    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, MemoryHub};
    use chrono::TimeDelta;

    fn controller(limit: usize) -> (Arc<MemoryBroker>, SubscriptionController) {
        let broker = Arc::new(MemoryHub::new().connect());
        let controller = SubscriptionController::new(broker.clone(), limit);
        (broker, controller)
    }

    fn later(seconds: i64) -> DateTime<Utc> {
        Utc::now() + TimeDelta::seconds(seconds)
    }

    #[tokio::test]
    async fn test_first_subscribe_hits_broker_once() {
        let (broker, controller) = controller(8);

        controller.subscribe("client:c1").await.unwrap();
        controller.subscribe("client:c1").await.unwrap();

        assert_eq!(controller.ref_count("client:c1").await, Some(2));
        assert!(broker.is_subscribed("client:c1"));
        assert_eq!(broker.redundant_subscribes(), 0);
    }

    #[tokio::test]
    async fn test_release_defers_unsubscribe() {
        let (broker, controller) = controller(8);

        controller.subscribe("client:c1").await.unwrap();
        controller.release("client:c1").await.unwrap();

        assert_eq!(controller.ref_count("client:c1").await, Some(0));
        assert!(broker.is_subscribed("client:c1"));
    }

    #[tokio::test]
    async fn test_sweep_respects_threshold() {
        let (broker, controller) = controller(8);
        let threshold = Duration::from_secs(60);

        controller.subscribe("client:c1").await.unwrap();
        controller.release("client:c1").await.unwrap();

        assert!(controller.sweep(later(30), threshold).await.is_empty());
        assert_eq!(controller.ref_count("client:c1").await, Some(0));

        let reclaimed = controller.sweep(later(120), threshold).await;
        assert_eq!(reclaimed, vec!["client:c1".to_string()]);
        assert!(controller.is_empty().await);
        assert!(!broker.is_subscribed("client:c1"));
    }

    #[tokio::test]
    async fn test_sweep_keeps_referenced_topics() {
        let (broker, controller) = controller(8);

        controller.subscribe("global").await.unwrap();

        assert!(controller
            .sweep(later(3600), Duration::from_secs(1))
            .await
            .is_empty());
        assert!(broker.is_subscribed("global"));
    }

    #[tokio::test]
    async fn test_balanced_release_then_invalid() {
        let (_, controller) = controller(8);

        for _ in 0..5 {
            controller.subscribe("user:u1").await.unwrap();
        }
        for _ in 0..5 {
            controller.release("user:u1").await.unwrap();
        }

        assert_eq!(controller.ref_count("user:u1").await, Some(0));
        assert!(matches!(
            controller.release("user:u1").await,
            Err(RelayError::InvalidRelease { topic }) if topic == "user:u1"
        ));
        assert_eq!(controller.ref_count("user:u1").await, Some(0));
    }

    #[tokio::test]
    async fn test_release_of_unknown_topic() {
        let (_, controller) = controller(8);

        assert!(matches!(
            controller.release("client:ghost").await,
            Err(RelayError::InvalidRelease { .. })
        ));
    }

    #[tokio::test]
    async fn test_capacity_exceeded_without_idle_entries() {
        let (broker, controller) = controller(2);

        controller.subscribe("a").await.unwrap();
        controller.subscribe("b").await.unwrap();

        let result = controller.subscribe("c").await;
        assert!(matches!(
            result,
            Err(RelayError::CapacityExceeded { limit: 2, .. })
        ));
        assert!(!broker.is_subscribed("c"));
        assert_eq!(controller.len().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_idle_entry() {
        let (broker, controller) = controller(2);

        controller.subscribe("a").await.unwrap();
        controller.subscribe("b").await.unwrap();
        controller.release("a").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        controller.release("b").await.unwrap();

        controller.subscribe("c").await.unwrap();

        assert_eq!(controller.topics().await, vec!["b".to_string(), "c".to_string()]);
        assert!(!broker.is_subscribed("a"));
        assert!(broker.is_subscribed("c"));
    }

    #[tokio::test]
    async fn test_touch_resets_idle_timer() {
        let (_, controller) = controller(8);

        controller.subscribe("global").await.unwrap();
        controller.release("global").await.unwrap();
        let before = controller.entry("global").await.unwrap().last_touched;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(controller.touch("global").await);
        assert!(!controller.touch("missing").await);

        let after = controller.entry("global").await.unwrap().last_touched;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_resubscribe_after_sweep_creates_fresh_entry() {
        let (broker, controller) = controller(8);

        controller.subscribe("client:c1").await.unwrap();
        controller.release("client:c1").await.unwrap();
        controller.sweep(later(120), Duration::from_secs(60)).await;

        controller.subscribe("client:c1").await.unwrap();

        assert_eq!(controller.ref_count("client:c1").await, Some(1));
        assert!(broker.is_subscribed("client:c1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_subscribe_release_stays_consistent() {
        let (broker, controller) = controller(8);
        let controller = Arc::new(controller);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        controller.subscribe("client:hot").await.unwrap();
                        tokio::task::yield_now().await;
                        controller.release("client:hot").await.unwrap();
                    }
                })
            })
            .collect();

        let sweeper = {
            let controller = controller.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    controller.sweep(later(3600), Duration::ZERO).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        for task in tasks {
            task.await.unwrap();
        }
        sweeper.await.unwrap();

        assert_eq!(broker.redundant_subscribes(), 0);
        match controller.ref_count("client:hot").await {
            Some(count) => {
                assert_eq!(count, 0);
                assert!(broker.is_subscribed("client:hot"));
            }
            None => assert!(!broker.is_subscribed("client:hot")),
        }
    }
}
