// Event model shared by every node in the cluster
//
// This module defines what travels between nodes (envelopes addressed to
// channels) and the handler registry used to hook into local event sources.

// Public API - what other modules can use
pub use address::ChannelAddress;
pub use envelope::{DecodeError, Envelope, EventKind, NodeId};
pub use events::{
    ClientInfo, ClientPayload, ClientTopicPayload, CustomEvent, LifecycleEvent, RemoteEvent,
    SystemEventName, UserInfo, UserTopicPayload,
};
pub use source::{Callback, HandlerCloser, Source};

// Internal modules
mod address;
mod envelope;
mod events;
mod source;
