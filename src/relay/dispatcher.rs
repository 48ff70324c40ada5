use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::runtime::LocalRuntime;
use super::stats::RelayStats;
use crate::broker::{Broker, BrokerMessage};
use crate::event::{
    ChannelAddress, ClientInfo, ClientPayload, ClientTopicPayload, CustomEvent, Envelope,
    EventKind, HandlerCloser, LifecycleEvent, NodeId, RemoteEvent, Source, SystemEventName,
    UserTopicPayload,
};
use crate::shared::RelayError;

/// What the dispatcher did with one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Published by this node, discarded
    SelfOrigin,
    /// Applied to the local runtime's lifecycle hook
    System(SystemEventName),
    /// Handed to this many custom handlers
    Custom { handlers: usize },
    /// Name or channel this node does not understand
    Dropped,
    /// Not a valid envelope or payload
    Malformed,
}

/// Application handlers for custom events, keyed by event name
#[derive(Default)]
struct CustomHandlers {
    by_name: RwLock<HashMap<String, Source<CustomEvent>>>,
}

impl CustomHandlers {
    fn register<F>(&self, name: &str, callback: F) -> HandlerCloser
    where
        F: Fn(&CustomEvent) + Send + Sync + 'static,
    {
        let mut by_name = self
            .by_name
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Names whose handlers were all closed
        by_name.retain(|_, source| !source.is_empty());

        by_name
            .entry(name.to_string())
            .or_insert_with(|| Source::new(format!("custom:{name}")))
            .register(callback)
    }

    fn dispatch(&self, event: &CustomEvent) -> usize {
        let source = self
            .by_name
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&event.name)
            .cloned();

        let Some(source) = source else {
            return 0;
        };

        let handlers = source.fire(event);
        if handlers == 0 {
            self.prune(&event.name);
        }
        handlers
    }

    /// Forgets `name` once its last handler has been closed
    fn prune(&self, name: &str) {
        let mut by_name = self
            .by_name
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if by_name.get(name).is_some_and(|source| source.is_empty()) {
            by_name.remove(name);
            debug!(name = %name, "Removed custom event with no handlers left");
        }
    }

    #[cfg(test)]
    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_name
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Maps local lifecycle events to relayed envelopes and back
///
/// Every envelope this dispatcher builds is stamped with its node id; inbound
/// envelopes carrying that same id are discarded, since every node also
/// subscribes to the channels it publishes to.
pub struct Dispatcher {
    node_id: NodeId,
    broker: Arc<dyn Broker>,
    runtime: Arc<dyn LocalRuntime>,
    custom: CustomHandlers,
    stats: Arc<RelayStats>,
}

impl Dispatcher {
    pub fn new(
        node_id: NodeId,
        broker: Arc<dyn Broker>,
        runtime: Arc<dyn LocalRuntime>,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            node_id,
            broker,
            runtime,
            custom: CustomHandlers::default(),
            stats,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn runtime(&self) -> &Arc<dyn LocalRuntime> {
        &self.runtime
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Registers an application handler for custom events named `name`
    pub fn on_custom<F>(&self, name: &str, callback: F) -> HandlerCloser
    where
        F: Fn(&CustomEvent) + Send + Sync + 'static,
    {
        self.custom.register(name, callback)
    }

    /// Publishes one envelope originating from this node
    pub async fn publish(
        &self,
        address: &ChannelAddress,
        kind: EventKind,
        name: &str,
        data: Value,
    ) -> Result<(), RelayError> {
        let envelope = Envelope::new(kind, &self.node_id, name, data);
        let bytes = envelope.encode().map_err(RelayError::Encode)?;

        if let Err(e) = self.broker.publish(&address.channel(), bytes).await {
            self.stats.record_publish_failure();
            return Err(e.into());
        }

        self.stats.record_published();
        debug!(channel = %address, name = %name, kind = ?kind, "Envelope published");
        Ok(())
    }

    /// Publishes to each address independently; every address is attempted
    /// and the first failure is returned
    async fn publish_all<T: Serialize>(
        &self,
        addresses: &[ChannelAddress],
        kind: EventKind,
        name: &str,
        payload: &T,
    ) -> Result<usize, RelayError> {
        let data = serde_json::to_value(payload).map_err(RelayError::Encode)?;
        let mut published = 0;
        let mut first_error = None;

        for address in addresses {
            match self.publish(address, kind, name, data.clone()).await {
                Ok(()) => published += 1,
                Err(e) => {
                    warn!(channel = %address, name = %name, error = %e, "Failed to relay event");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(published),
        }
    }

    /// The client channel plus, for clients with a user, the user channel
    fn client_addresses(client: &ClientInfo) -> Vec<ChannelAddress> {
        let mut addresses = vec![ChannelAddress::for_client(&client.id)];
        if let Some(user_id) = &client.user_id {
            addresses.push(ChannelAddress::for_user(user_id));
        }
        addresses
    }

    async fn relay_client(
        &self,
        name: SystemEventName,
        client: &ClientInfo,
        options: &Value,
    ) -> Result<usize, RelayError> {
        let payload = ClientPayload {
            client_id: client.id.clone(),
            user_id: client.user_id.clone(),
            options: options.clone(),
        };
        self.publish_all(
            &Self::client_addresses(client),
            EventKind::System,
            name.as_ref(),
            &payload,
        )
        .await
    }

    async fn relay_client_topic(
        &self,
        name: SystemEventName,
        client: &ClientInfo,
        topic: &str,
        timestamp: i64,
    ) -> Result<usize, RelayError> {
        let payload = ClientTopicPayload {
            client_id: client.id.clone(),
            user_id: client.user_id.clone(),
            topic: topic.to_string(),
            timestamp,
        };
        self.publish_all(
            &Self::client_addresses(client),
            EventKind::System,
            name.as_ref(),
            &payload,
        )
        .await
    }

    async fn relay_user_topic(
        &self,
        name: SystemEventName,
        user_id: &str,
        topic: &str,
        timestamp: i64,
    ) -> Result<usize, RelayError> {
        let payload = UserTopicPayload {
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            timestamp,
        };
        self.publish_all(
            &[ChannelAddress::for_user(user_id)],
            EventKind::System,
            name.as_ref(),
            &payload,
        )
        .await
    }

    /// Forwards a local lifecycle event to the cluster and returns the number
    /// of envelopes published
    pub async fn relay_local(&self, event: &LifecycleEvent) -> Result<usize, RelayError> {
        match event {
            LifecycleEvent::ClientEvent { client, options } => {
                self.relay_client(SystemEventName::ClientEvent, client, options)
                    .await
            }
            LifecycleEvent::ClientConnected { client, options } => {
                self.relay_client(SystemEventName::ClientConnect, client, options)
                    .await
            }
            LifecycleEvent::ClientReconnected { client, options } => {
                self.relay_client(SystemEventName::ClientReconnect, client, options)
                    .await
            }
            LifecycleEvent::ClientDisconnected { client } => {
                self.relay_client(SystemEventName::ClientDisconnect, client, &Value::Null)
                    .await
            }
            LifecycleEvent::ClientInactivated { client } => {
                self.relay_client(SystemEventName::ClientInactivate, client, &Value::Null)
                    .await
            }
            LifecycleEvent::ClientSubscribed {
                client,
                topic,
                timestamp,
            } => {
                self.relay_client_topic(SystemEventName::ClientSubscribe, client, topic, *timestamp)
                    .await
            }
            LifecycleEvent::ClientUnsubscribed {
                client,
                topic,
                timestamp,
            } => {
                self.relay_client_topic(
                    SystemEventName::ClientUnsubscribe,
                    client,
                    topic,
                    *timestamp,
                )
                .await
            }
            LifecycleEvent::UserSubscribed {
                user_id,
                topic,
                timestamp,
            } => {
                self.relay_user_topic(SystemEventName::UserSubscribe, user_id, topic, *timestamp)
                    .await
            }
            LifecycleEvent::UserUnsubscribed {
                user_id,
                topic,
                timestamp,
            } => {
                self.relay_user_topic(SystemEventName::UserUnsubscribe, user_id, topic, *timestamp)
                    .await
            }
            LifecycleEvent::Emitted { name, payload } => {
                self.publish_all(&[ChannelAddress::global()], EventKind::Custom, name, payload)
                    .await
            }
        }
    }

    /// Decodes and dispatches one raw broker message
    ///
    /// Never fails: anything that cannot be dispatched is dropped.
    pub async fn handle_message(&self, message: &BrokerMessage) -> Dispatch {
        self.stats.record_received();

        let envelope = match Envelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(channel = %message.channel, error = %e, "Dropping undecodable message");
                return Dispatch::Malformed;
            }
        };

        if envelope.origin() == &self.node_id {
            self.stats.record_self_filtered();
            return Dispatch::SelfOrigin;
        }

        let Some(channel) = ChannelAddress::parse(&message.channel) else {
            warn!(channel = %message.channel, "Dropping message from unaddressable channel");
            return Dispatch::Dropped;
        };

        self.handle_envelope(channel, envelope).await
    }

    /// Routes a decoded envelope from another node by kind
    pub async fn handle_envelope(&self, channel: ChannelAddress, envelope: Envelope) -> Dispatch {
        if envelope.origin() == &self.node_id {
            self.stats.record_self_filtered();
            return Dispatch::SelfOrigin;
        }

        let dispatch = match envelope.kind() {
            EventKind::System => self.handle_system(channel, envelope).await,
            EventKind::Custom => self.handle_custom(channel, envelope),
        };

        if matches!(dispatch, Dispatch::System(_) | Dispatch::Custom { .. }) {
            self.stats.record_delivered();
        }
        dispatch
    }

    async fn handle_system(&self, channel: ChannelAddress, envelope: Envelope) -> Dispatch {
        // Names introduced by newer peers are ignored
        let Some(name) = SystemEventName::parse(envelope.name()) else {
            return Dispatch::Dropped;
        };

        let event = match RemoteEvent::from_wire(name, envelope.into_data()) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(
                    channel = %channel,
                    name = name.as_ref(),
                    error = %e,
                    "Dropping system event with invalid payload"
                );
                return Dispatch::Malformed;
            }
        };

        debug!(channel = %channel, name = name.as_ref(), "Applying remote system event");
        self.runtime.apply_remote(&channel, event).await;
        Dispatch::System(name)
    }

    fn handle_custom(&self, channel: ChannelAddress, envelope: Envelope) -> Dispatch {
        let event = CustomEvent {
            name: envelope.name().to_string(),
            channel,
            payload: envelope.into_data(),
        };

        match self.custom.dispatch(&event) {
            0 => Dispatch::Dropped,
            handlers => {
                debug!(channel = %event.channel, name = %event.name, handlers = handlers, "Custom event dispatched");
                Dispatch::Custom { handlers }
            }
        }
    }
}
