#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use cluster_relay::{Broker, BrokerError, InboundStream, MemoryBroker};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// Broker that fails chosen operations and forwards everything else to a
/// real in-memory connection
pub struct FlakyBroker {
    inner: MemoryBroker,
    failing_publish: Mutex<HashSet<String>>,
    failing_subscribe: Mutex<HashSet<String>>,
    failing_unsubscribe: Mutex<HashSet<String>>,
}

impl FlakyBroker {
    pub fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            failing_publish: Mutex::new(HashSet::new()),
            failing_subscribe: Mutex::new(HashSet::new()),
            failing_unsubscribe: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_publish(&self, channel: &str) {
        self.failing_publish.lock().unwrap().insert(channel.to_string());
    }

    pub fn fail_subscribe(&self, channel: &str) {
        self.failing_subscribe.lock().unwrap().insert(channel.to_string());
    }

    pub fn fail_unsubscribe(&self, channel: &str) {
        self.failing_unsubscribe.lock().unwrap().insert(channel.to_string());
    }

    pub fn heal(&self) {
        self.failing_publish.lock().unwrap().clear();
        self.failing_subscribe.lock().unwrap().clear();
        self.failing_unsubscribe.lock().unwrap().clear();
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.inner.is_subscribed(channel)
    }

    fn check(set: &Mutex<HashSet<String>>, channel: &str) -> Result<(), BrokerError> {
        if set.lock().unwrap().contains(channel) {
            Err(BrokerError::Unavailable(format!("injected failure on {channel}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        Self::check(&self.failing_publish, channel)?;
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        Self::check(&self.failing_subscribe, channel)?;
        self.inner.subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        Self::check(&self.failing_unsubscribe, channel)?;
        self.inner.unsubscribe(channel).await
    }

    fn inbound(&self) -> InboundStream {
        self.inner.inbound()
    }
}
