use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumIter, EnumString};

use super::address::ChannelAddress;

/// A client as known to the runtime hosting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    /// The user the client is authenticated as, if any
    pub user_id: Option<String>,
}

impl ClientInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A user and the clients it currently has on the local node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: String,
    pub clients: Vec<String>,
}

/// Lifecycle events fired by the local runtime
///
/// Events represent facts about things that already happened on this node.
/// Client events carry a snapshot of the client taken when the event fired,
/// so a disconnected client still reports the user it belonged to.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A generic event raised by a connected client
    ClientEvent { client: ClientInfo, options: Value },

    ClientConnected { client: ClientInfo, options: Value },

    ClientReconnected { client: ClientInfo, options: Value },

    ClientDisconnected { client: ClientInfo },

    /// The client is still known but no longer active
    ClientInactivated { client: ClientInfo },

    ClientSubscribed {
        client: ClientInfo,
        topic: String,
        timestamp: i64,
    },

    ClientUnsubscribed {
        client: ClientInfo,
        topic: String,
        timestamp: i64,
    },

    UserSubscribed {
        user_id: String,
        topic: String,
        timestamp: i64,
    },

    UserUnsubscribed {
        user_id: String,
        topic: String,
        timestamp: i64,
    },

    /// An application-level emission
    Emitted { name: String, payload: Value },
}

impl LifecycleEvent {
    /// Get a human-readable description of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::ClientEvent { .. } => "client_event",
            LifecycleEvent::ClientConnected { .. } => "client_connected",
            LifecycleEvent::ClientReconnected { .. } => "client_reconnected",
            LifecycleEvent::ClientDisconnected { .. } => "client_disconnected",
            LifecycleEvent::ClientInactivated { .. } => "client_inactivated",
            LifecycleEvent::ClientSubscribed { .. } => "client_subscribed",
            LifecycleEvent::ClientUnsubscribed { .. } => "client_unsubscribed",
            LifecycleEvent::UserSubscribed { .. } => "user_subscribed",
            LifecycleEvent::UserUnsubscribed { .. } => "user_unsubscribed",
            LifecycleEvent::Emitted { .. } => "emitted",
        }
    }

    /// The client this event is about, if any
    pub fn client(&self) -> Option<&ClientInfo> {
        match self {
            LifecycleEvent::ClientEvent { client, .. }
            | LifecycleEvent::ClientConnected { client, .. }
            | LifecycleEvent::ClientReconnected { client, .. }
            | LifecycleEvent::ClientDisconnected { client }
            | LifecycleEvent::ClientInactivated { client }
            | LifecycleEvent::ClientSubscribed { client, .. }
            | LifecycleEvent::ClientUnsubscribed { client, .. } => Some(client),
            LifecycleEvent::UserSubscribed { .. }
            | LifecycleEvent::UserUnsubscribed { .. }
            | LifecycleEvent::Emitted { .. } => None,
        }
    }
}

/// Closed set of system event names understood on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, EnumIter)]
pub enum SystemEventName {
    #[strum(serialize = "clientEvent")]
    ClientEvent,
    #[strum(serialize = "clientConnect")]
    ClientConnect,
    #[strum(serialize = "clientReconnect")]
    ClientReconnect,
    #[strum(serialize = "clientDisconnect")]
    ClientDisconnect,
    #[strum(serialize = "clientInactivate")]
    ClientInactivate,
    #[strum(serialize = "clientSubscribe")]
    ClientSubscribe,
    #[strum(serialize = "clientUnsubscribe")]
    ClientUnsubscribe,
    #[strum(serialize = "userSubscribe")]
    UserSubscribe,
    #[strum(serialize = "userUnsubscribe")]
    UserUnsubscribe,
}

impl SystemEventName {
    /// Looks up a wire name; names from newer peers map to `None`
    pub fn parse(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

/// Payload of client lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPayload {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

/// Payload of client topic (un)subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTopicPayload {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub topic: String,
    pub timestamp: i64,
}

/// Payload of user topic (un)subscriptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTopicPayload {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub topic: String,
    pub timestamp: i64,
}

/// A lifecycle event that happened on another node
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    ClientEvent(ClientPayload),
    ClientConnected(ClientPayload),
    ClientReconnected(ClientPayload),
    ClientDisconnected(ClientPayload),
    ClientInactivated(ClientPayload),
    ClientSubscribed(ClientTopicPayload),
    ClientUnsubscribed(ClientTopicPayload),
    UserSubscribed(UserTopicPayload),
    UserUnsubscribed(UserTopicPayload),
}

impl RemoteEvent {
    /// Decodes the data of a system envelope named `name`
    pub fn from_wire(name: SystemEventName, data: Value) -> Result<Self, serde_json::Error> {
        let event = match name {
            SystemEventName::ClientEvent => RemoteEvent::ClientEvent(serde_json::from_value(data)?),
            SystemEventName::ClientConnect => {
                RemoteEvent::ClientConnected(serde_json::from_value(data)?)
            }
            SystemEventName::ClientReconnect => {
                RemoteEvent::ClientReconnected(serde_json::from_value(data)?)
            }
            SystemEventName::ClientDisconnect => {
                RemoteEvent::ClientDisconnected(serde_json::from_value(data)?)
            }
            SystemEventName::ClientInactivate => {
                RemoteEvent::ClientInactivated(serde_json::from_value(data)?)
            }
            SystemEventName::ClientSubscribe => {
                RemoteEvent::ClientSubscribed(serde_json::from_value(data)?)
            }
            SystemEventName::ClientUnsubscribe => {
                RemoteEvent::ClientUnsubscribed(serde_json::from_value(data)?)
            }
            SystemEventName::UserSubscribe => {
                RemoteEvent::UserSubscribed(serde_json::from_value(data)?)
            }
            SystemEventName::UserUnsubscribe => {
                RemoteEvent::UserUnsubscribed(serde_json::from_value(data)?)
            }
        };
        Ok(event)
    }

    pub fn name(&self) -> SystemEventName {
        match self {
            RemoteEvent::ClientEvent(_) => SystemEventName::ClientEvent,
            RemoteEvent::ClientConnected(_) => SystemEventName::ClientConnect,
            RemoteEvent::ClientReconnected(_) => SystemEventName::ClientReconnect,
            RemoteEvent::ClientDisconnected(_) => SystemEventName::ClientDisconnect,
            RemoteEvent::ClientInactivated(_) => SystemEventName::ClientInactivate,
            RemoteEvent::ClientSubscribed(_) => SystemEventName::ClientSubscribe,
            RemoteEvent::ClientUnsubscribed(_) => SystemEventName::ClientUnsubscribe,
            RemoteEvent::UserSubscribed(_) => SystemEventName::UserSubscribe,
            RemoteEvent::UserUnsubscribed(_) => SystemEventName::UserUnsubscribe,
        }
    }
}

/// An application-level event received from another node
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub name: String,
    /// Channel the event arrived on
    pub channel: ChannelAddress,
    pub payload: Value,
}
