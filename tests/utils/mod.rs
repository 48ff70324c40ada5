pub mod assertions;
pub mod mocks;
pub mod setup;

// Re-export main utilities for use by test files
#[allow(unused_imports)]
pub use assertions::{eventually, RemoteEventAssertion};
#[allow(unused_imports)]
pub use mocks::FlakyBroker;
#[allow(unused_imports)]
pub use setup::{TestCluster, TestClusterBuilder, TestNode};
