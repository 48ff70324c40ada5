#![allow(dead_code)] // Not every test touches every node field

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cluster_relay::{
    Adapter, InMemoryRuntime, MemoryBroker, MemoryHub, NodeId, RelayConfig, RelayHandle,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestNode {
    pub name: String,
    pub adapter: Adapter,
    pub broker: Arc<MemoryBroker>,
    pub runtime: Arc<InMemoryRuntime>,
    pub handle: Option<RelayHandle>,
}

impl TestNode {
    /// Stops this node's relay; the node stays on the hub
    pub async fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
        }
    }
}

pub struct TestCluster {
    pub hub: MemoryHub,
    pub nodes: Vec<TestNode>,
    pub token: CancellationToken,
}

impl TestCluster {
    pub fn node(&self, name: &str) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    pub fn node_mut(&mut self, name: &str) -> &mut TestNode {
        self.nodes
            .iter_mut()
            .find(|n| n.name == name)
            .unwrap_or_else(|| panic!("no node named {name}"))
    }

    /// Declares interest in `channel` on behalf of `node`
    pub async fn follow(&self, node: &str, channel: &str) {
        self.node(node)
            .adapter
            .subscriptions()
            .subscribe(channel)
            .await
            .unwrap();
    }

    /// Lets in-flight relaying settle
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub async fn shutdown(mut self) {
        for node in &mut self.nodes {
            node.stop().await;
        }
        self.token.cancel();
    }
}

pub struct TestClusterBuilder {
    nodes: Vec<String>,
    config: RelayConfig,
    start: bool,
}

impl TestClusterBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            config: RelayConfig::default().with_workers(2),
            start: true,
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<&str>) -> Self {
        self.nodes = nodes.into_iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_two_nodes(self) -> Self {
        self.with_nodes(vec!["n1", "n2"])
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the nodes without starting their relays
    pub fn stopped(mut self) -> Self {
        self.start = false;
        self
    }

    pub async fn build(self) -> TestCluster {
        let hub = MemoryHub::new();
        let token = CancellationToken::new();
        let mut nodes = Vec::with_capacity(self.nodes.len());

        for name in self.nodes {
            let broker = Arc::new(hub.connect());
            let runtime = Arc::new(InMemoryRuntime::new());
            let adapter = Adapter::with_node_id(
                NodeId::from(name.as_str()),
                broker.clone(),
                runtime.clone(),
                self.config.clone(),
            )
            .unwrap();

            let handle = if self.start {
                Some(adapter.start(&token).await.unwrap())
            } else {
                None
            };

            nodes.push(TestNode {
                name,
                adapter,
                broker,
                runtime,
                handle,
            });
        }

        TestCluster { hub, nodes, token }
    }
}
