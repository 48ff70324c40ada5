use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

use crate::event::{ChannelAddress, ClientInfo, LifecycleEvent, RemoteEvent, Source, UserInfo};

/// The local real-time runtime the relay is attached to
///
/// Accessors only ever look at this node; they must never trigger a cluster
/// round-trip.
#[async_trait]
pub trait LocalRuntime: Send + Sync {
    /// Source of the lifecycle events this node produces
    fn events(&self) -> Source<LifecycleEvent>;

    fn local_client(&self, client_id: &str) -> Option<ClientInfo>;

    /// Every client currently connected to this node
    fn local_clients(&self) -> Vec<ClientInfo>;

    fn local_user(&self, user_id: &str) -> Option<UserInfo>;

    /// Hook invoked for a lifecycle event that happened on another node
    async fn apply_remote(&self, channel: &ChannelAddress, event: RemoteEvent);

    /// Emits an application event on this node
    async fn emit(&self, name: &str, payload: Value);
}

/// In-memory implementation of LocalRuntime for development and testing
///
/// Tracks connected clients, fires lifecycle events through its source, and
/// records what it receives from other nodes.
pub struct InMemoryRuntime {
    events: Source<LifecycleEvent>,
    clients: RwLock<HashMap<String, ClientInfo>>,
    remote: Mutex<Vec<(ChannelAddress, RemoteEvent)>>,
    emitted: Mutex<Vec<(String, Value)>>,
}

impl Default for InMemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self {
            events: Source::new("runtime"),
            clients: RwLock::new(HashMap::new()),
            remote: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
        }
    }

    fn client_snapshot(&self, client_id: &str) -> ClientInfo {
        self.local_client(client_id)
            .unwrap_or_else(|| ClientInfo::new(client_id))
    }

    fn timestamp() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn connect(&self, client: ClientInfo, options: Value) {
        self.clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(client.id.clone(), client.clone());

        info!(client_id = %client.id, "Client connected");
        self.events
            .fire(&LifecycleEvent::ClientConnected { client, options });
    }

    pub fn reconnect(&self, client_id: &str, options: Value) {
        let client = self.client_snapshot(client_id);
        self.events
            .fire(&LifecycleEvent::ClientReconnected { client, options });
    }

    /// Fires the disconnect while the client is still known, then forgets it
    pub fn disconnect(&self, client_id: &str) {
        let client = self.client_snapshot(client_id);
        self.events
            .fire(&LifecycleEvent::ClientDisconnected { client });

        self.clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(client_id);
        info!(client_id = %client_id, "Client disconnected");
    }

    pub fn inactivate(&self, client_id: &str) {
        let client = self.client_snapshot(client_id);
        self.events
            .fire(&LifecycleEvent::ClientInactivated { client });
    }

    pub fn client_event(&self, client_id: &str, options: Value) {
        let client = self.client_snapshot(client_id);
        self.events
            .fire(&LifecycleEvent::ClientEvent { client, options });
    }

    pub fn subscribe_client(&self, client_id: &str, topic: &str) {
        let client = self.client_snapshot(client_id);
        self.events.fire(&LifecycleEvent::ClientSubscribed {
            client,
            topic: topic.to_string(),
            timestamp: Self::timestamp(),
        });
    }

    pub fn unsubscribe_client(&self, client_id: &str, topic: &str) {
        let client = self.client_snapshot(client_id);
        self.events.fire(&LifecycleEvent::ClientUnsubscribed {
            client,
            topic: topic.to_string(),
            timestamp: Self::timestamp(),
        });
    }

    pub fn subscribe_user(&self, user_id: &str, topic: &str) {
        self.events.fire(&LifecycleEvent::UserSubscribed {
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            timestamp: Self::timestamp(),
        });
    }

    pub fn unsubscribe_user(&self, user_id: &str, topic: &str) {
        self.events.fire(&LifecycleEvent::UserUnsubscribed {
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            timestamp: Self::timestamp(),
        });
    }

    /// Events applied from other nodes, in arrival order
    pub fn remote_events(&self) -> Vec<(ChannelAddress, RemoteEvent)> {
        lock(&self.remote).clone()
    }

    /// Application events emitted on this node
    pub fn emitted(&self) -> Vec<(String, Value)> {
        lock(&self.emitted).clone()
    }
}

#[async_trait]
impl LocalRuntime for InMemoryRuntime {
    fn events(&self) -> Source<LifecycleEvent> {
        self.events.clone()
    }

    fn local_client(&self, client_id: &str) -> Option<ClientInfo> {
        self.clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(client_id)
            .cloned()
    }

    fn local_clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }

    fn local_user(&self, user_id: &str) -> Option<UserInfo> {
        let clients = self
            .clients
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut owned: Vec<String> = clients
            .values()
            .filter(|c| c.user_id.as_deref() == Some(user_id))
            .map(|c| c.id.clone())
            .collect();

        if owned.is_empty() {
            return None;
        }
        owned.sort();

        Some(UserInfo {
            id: user_id.to_string(),
            clients: owned,
        })
    }

    async fn apply_remote(&self, channel: &ChannelAddress, event: RemoteEvent) {
        debug!(channel = %channel, event = ?event, "Applying remote lifecycle event");
        lock(&self.remote).push((channel.clone(), event));
    }

    async fn emit(&self, name: &str, payload: Value) {
        lock(&self.emitted).push((name.to_string(), payload.clone()));
        self.events.fire(&LifecycleEvent::Emitted {
            name: name.to_string(),
            payload,
        });
    }
}
