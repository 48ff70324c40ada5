use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity of this node, minted once per process
///
/// Only used to recognise envelopes this node published itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        NodeId(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        NodeId(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing class of a relayed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Framework lifecycle events (connect, subscribe, ...)
    System,
    /// Application-level emissions
    Custom,
}

impl EventKind {
    pub const fn code(self) -> u8 {
        match self {
            EventKind::System => 1,
            EventKind::Custom => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventKind::System),
            2 => Some(EventKind::Custom),
            _ => None,
        }
    }
}

/// Errors produced while decoding an inbound broker message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event kind: {0}")]
    UnknownKind(u8),
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    kind: u8,
    origin: String,
    name: String,
    #[serde(default)]
    data: Value,
}

/// The unit published between nodes
///
/// `origin` is fixed at construction and the fields are only readable, so
/// nothing between publish and receipt can rewrite it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: EventKind,
    origin: NodeId,
    name: String,
    data: Value,
}

impl Envelope {
    pub fn new(kind: EventKind, origin: &NodeId, name: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            origin: origin.clone(),
            name: name.into(),
            data,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn origin(&self) -> &NodeId {
        &self.origin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&WireEnvelope {
            kind: self.kind.code(),
            origin: self.origin.to_string(),
            name: self.name.clone(),
            data: self.data.clone(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)?;
        let kind = EventKind::from_code(wire.kind).ok_or(DecodeError::UnknownKind(wire.kind))?;

        Ok(Self {
            kind,
            origin: NodeId(wire.origin),
            name: wire.name,
            data: wire.data,
        })
    }
}
