// Library crate for the cluster relay
// This file exposes the public API for integration tests and embedders

pub mod broker;
pub mod config;
pub mod event;
pub mod relay;
pub mod shared;
pub mod subscription;

// Re-export commonly used types for easier access in tests
pub use broker::{Broker, BrokerError, BrokerMessage, InboundStream, MemoryBroker, MemoryHub};
pub use config::RelayConfig;
pub use event::{
    ChannelAddress, ClientInfo, CustomEvent, Envelope, EventKind, HandlerCloser, LifecycleEvent,
    NodeId, RemoteEvent, Source, SystemEventName, UserInfo,
};
pub use relay::{
    Adapter, ClientInterest, ClusterClient, ClusterUser, Dispatch, InMemoryRuntime, LocalRuntime,
    RelayHandle, RelayStatsSnapshot,
};
pub use shared::RelayError;
pub use subscription::{SubscriptionController, SweepConfig};
