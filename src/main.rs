use cluster_relay::{
    Adapter, ClientInfo, CustomEvent, InMemoryRuntime, MemoryHub, RelayConfig, RelayError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), RelayError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cluster_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env()?;
    info!(?config, "Starting two-node cluster relay demo");

    // Both nodes share one in-process broker
    let hub = MemoryHub::new();
    let runtime_a = Arc::new(InMemoryRuntime::new());
    let runtime_b = Arc::new(InMemoryRuntime::new());
    let node_a = Adapter::new(Arc::new(hub.connect()), runtime_a.clone(), config.clone())?;
    let node_b = Adapter::new(Arc::new(hub.connect()), runtime_b.clone(), config)?;

    let _chat = node_b.on_custom("chat", |event: &CustomEvent| {
        info!(channel = %event.channel, payload = %event.payload, "Node B received chat");
    });

    let shutdown = CancellationToken::new();
    let relay_a = node_a.start(&shutdown).await?;
    let relay_b = node_b.start(&shutdown).await?;

    // Node B follows alice's client so lifecycle events from node A reach it
    node_b.subscriptions().subscribe("client:alice-1").await?;

    runtime_a.connect(ClientInfo::new("alice-1").with_user("alice"), json!({"agent": "demo"}));
    node_a.emit("chat", json!({"text": "hello from node A"})).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    runtime_a.disconnect("alice-1");
    tokio::time::sleep(Duration::from_millis(100)).await;

    for (channel, event) in runtime_b.remote_events() {
        info!(channel = %channel, name = event.name().as_ref(), "Node B applied remote event");
    }

    relay_a.shutdown().await;
    relay_b.shutdown().await;

    info!(node_a = ?node_a.stats(), node_b = ?node_b.stats(), "Relay statistics");
    Ok(())
}
