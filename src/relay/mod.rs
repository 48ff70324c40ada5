// Node-side relay: turns local lifecycle events into broker envelopes and
// feeds envelopes from other nodes back into the local runtime.

// Public API - what other modules can use
pub use adapter::{Adapter, ClusterClient, ClusterUser, RelayHandle};
pub use dispatcher::{Dispatch, Dispatcher};
pub use interest::ClientInterest;
pub use runtime::{InMemoryRuntime, LocalRuntime};
pub use stats::{RelayStats, RelayStatsSnapshot};
pub use worker::WorkerPool;

// Internal modules
mod adapter;
mod dispatcher;
mod interest;
mod runtime;
mod stats;
mod worker;
