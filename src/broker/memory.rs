use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{Broker, BrokerError, BrokerMessage, InboundSender, InboundStream};

struct Connection {
    channels: HashSet<String>,
    sender: InboundSender,
    redundant_subscribes: usize,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<u64, Connection>,
}

/// In-process broker shared by several nodes
///
/// Every [`MemoryBroker`] obtained from the same hub sees the messages
/// published by the others (and its own) on channels it subscribed to.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a new broker connection on this hub
    pub fn connect(&self) -> MemoryBroker {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, inbound) = InboundStream::channel();

        self.lock().connections.insert(
            id,
            Connection {
                channels: HashSet::new(),
                sender,
                redundant_subscribes: 0,
            },
        );

        MemoryBroker {
            id,
            hub: self.clone(),
            inbound,
            closed: AtomicBool::new(false),
        }
    }

    /// Delivers raw bytes to every connection subscribed to `channel`
    ///
    /// Returns the number of receivers.
    pub fn publish_raw(&self, channel: &str, payload: Vec<u8>) -> usize {
        let state = self.lock();
        let mut receivers = 0;

        for connection in state.connections.values() {
            if connection.channels.contains(channel) {
                let message = BrokerMessage {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                };
                if connection.sender.send(message).is_ok() {
                    receivers += 1;
                }
            }
        }

        debug!(channel = %channel, receivers = receivers, "Message published on hub");
        receivers
    }

    /// Number of connections currently subscribed to `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .connections
            .values()
            .filter(|c| c.channels.contains(channel))
            .count()
    }
}

/// One node's connection to a [`MemoryHub`]
pub struct MemoryBroker {
    id: u64,
    hub: MemoryHub,
    inbound: InboundStream,
    closed: AtomicBool,
}

impl MemoryBroker {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.hub
            .lock()
            .connections
            .get(&self.id)
            .is_some_and(|c| c.channels.contains(channel))
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .hub
            .lock()
            .connections
            .get(&self.id)
            .map(|c| c.channels.iter().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// How many times `subscribe` was called for a channel already subscribed
    pub fn redundant_subscribes(&self) -> usize {
        self.hub
            .lock()
            .connections
            .get(&self.id)
            .map_or(0, |c| c.redundant_subscribes)
    }

    /// Disconnects from the hub; the inbound stream ends once drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.hub.lock().connections.remove(&self.id);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.hub.publish_raw(channel, payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.hub.lock();
        let connection = state
            .connections
            .get_mut(&self.id)
            .ok_or(BrokerError::Closed)?;

        if !connection.channels.insert(channel.to_string()) {
            connection.redundant_subscribes += 1;
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.hub.lock();
        if let Some(connection) = state.connections.get_mut(&self.id) {
            connection.channels.remove(channel);
        }
        Ok(())
    }

    fn inbound(&self) -> InboundStream {
        self.inbound.clone()
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        self.hub.lock().connections.remove(&self.id);
    }
}
