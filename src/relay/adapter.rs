use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::interest::ClientInterest;
use super::runtime::LocalRuntime;
use super::stats::{RelayStats, RelayStatsSnapshot};
use super::worker::WorkerPool;
use crate::broker::Broker;
use crate::config::RelayConfig;
use crate::event::{
    ChannelAddress, CustomEvent, EventKind, HandlerCloser, LifecycleEvent, NodeId,
};
use crate::shared::RelayError;
use crate::subscription::{run_sweeper, SubscriptionController};

/// Attaches one node's local runtime to the cluster
///
/// Owns the node id, the subscription controller and the dispatcher. Nothing
/// is relayed until [`Adapter::start`] is called, and at most one relay runs
/// per adapter at a time.
pub struct Adapter {
    config: RelayConfig,
    broker: Arc<dyn Broker>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<SubscriptionController>,
    interest: Arc<ClientInterest>,
    stats: Arc<RelayStats>,
    running: Arc<AtomicBool>,
}

impl Adapter {
    /// Builds an adapter with a freshly generated node id
    pub fn new(
        broker: Arc<dyn Broker>,
        runtime: Arc<dyn LocalRuntime>,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        Self::with_node_id(NodeId::generate(), broker, runtime, config)
    }

    pub fn with_node_id(
        node_id: NodeId,
        broker: Arc<dyn Broker>,
        runtime: Arc<dyn LocalRuntime>,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        config.validate()?;

        let stats = Arc::new(RelayStats::default());
        let subscriptions = Arc::new(SubscriptionController::new(
            Arc::clone(&broker),
            config.max_subscriptions,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            node_id,
            Arc::clone(&broker),
            runtime,
            Arc::clone(&stats),
        ));

        Ok(Self {
            config,
            broker,
            dispatcher,
            subscriptions,
            interest: Arc::new(ClientInterest::new()),
            stats,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        self.dispatcher.node_id()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionController> {
        &self.subscriptions
    }

    /// Subscription references held for local clients
    pub fn interest(&self) -> &Arc<ClientInterest> {
        &self.interest
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Registers a handler for custom events named `name` arriving from other nodes
    pub fn on_custom<F>(&self, name: &str, callback: F) -> HandlerCloser
    where
        F: Fn(&CustomEvent) + Send + Sync + 'static,
    {
        self.dispatcher.on_custom(name, callback)
    }

    /// Publishes a custom event to every node
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), RelayError> {
        self.dispatcher
            .publish(&ChannelAddress::global(), EventKind::Custom, name, payload)
            .await
    }

    /// Cluster view of a client, wherever it is connected
    pub fn client(&self, client_id: impl Into<String>) -> ClusterClient {
        ClusterClient {
            id: client_id.into(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    /// Cluster view of a user, across all of their clients
    pub fn user(&self, user_id: impl Into<String>) -> ClusterUser {
        ClusterUser {
            id: user_id.into(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    /// Joins the cluster and starts relaying
    ///
    /// Subscribes `global`, hooks the runtime's lifecycle events, follows the
    /// clients already connected and spawns the outbound publisher, the
    /// sweeper and the worker pool. Everything stops once `token` or the
    /// returned handle is cancelled. Fails with `AlreadyRunning` until the
    /// previous handle has been shut down.
    pub async fn start(&self, token: &CancellationToken) -> Result<RelayHandle, RelayError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(node_id = %self.node_id(), "Relay start requested while already running");
            return Err(RelayError::AlreadyRunning);
        }

        let global = ChannelAddress::global().channel();
        if let Err(e) = self.subscriptions.subscribe(&global).await {
            self.running.store(false, Ordering::Release);
            return Err(e);
        }

        let shutdown = token.child_token();
        let (sender, receiver) = mpsc::channel(self.config.outbound_capacity);
        let stats = Arc::clone(&self.stats);
        let runtime = self.dispatcher.runtime();
        let hook = runtime
            .events()
            .register_until(&shutdown, move |event: &LifecycleEvent| {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        stats.record_outbound_overflow();
                        warn!(event_type = event.event_type(), "Outbound queue full, event not relayed");
                    }
                    Err(TrySendError::Closed(event)) => {
                        debug!(event_type = event.event_type(), "Relay stopped, event not relayed");
                    }
                }
            });

        // Clients that connected before the hook existed; their later
        // disconnects are already queued behind this
        for client in runtime.local_clients() {
            self.interest.follow(&self.subscriptions, &client).await;
        }

        let outbound = tokio::spawn(run_outbound(
            receiver,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.subscriptions),
            Arc::clone(&self.interest),
            shutdown.clone(),
        ));
        let sweeper = tokio::spawn(run_sweeper(
            Arc::clone(&self.subscriptions),
            self.config.sweep(),
            shutdown.clone(),
        ));
        let workers = WorkerPool::spawn(
            self.config.workers,
            self.broker.inbound(),
            Arc::clone(&self.dispatcher),
            shutdown.clone(),
        );

        info!(node_id = %self.node_id(), workers = workers.size(), "Cluster relay started");

        Ok(RelayHandle {
            node_id: self.node_id().clone(),
            shutdown,
            hook,
            tasks: vec![outbound, sweeper],
            workers,
            subscriptions: Arc::clone(&self.subscriptions),
            interest: Arc::clone(&self.interest),
            running: Arc::clone(&self.running),
        })
    }
}

async fn run_outbound(
    mut events: mpsc::Receiver<LifecycleEvent>,
    dispatcher: Arc<Dispatcher>,
    subscriptions: Arc<SubscriptionController>,
    interest: Arc<ClientInterest>,
    shutdown: CancellationToken,
) {
    debug!("Outbound relay task started");

    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            break;
        };

        // Follow local clients so events addressed to them reach this node
        match &event {
            LifecycleEvent::ClientConnected { client, .. } => {
                interest.follow(&subscriptions, client).await;
            }
            LifecycleEvent::ClientDisconnected { client } => {
                interest.unfollow(&subscriptions, &client.id).await;
            }
            _ => {}
        }

        if let Err(e) = dispatcher.relay_local(&event).await {
            warn!(event_type = event.event_type(), error = %e, "Failed to relay local event");
        }
    }

    debug!("Outbound relay task stopped");
}

/// Running relay returned by [`Adapter::start`]
pub struct RelayHandle {
    node_id: NodeId,
    shutdown: CancellationToken,
    hook: HandlerCloser,
    tasks: Vec<JoinHandle<()>>,
    workers: WorkerPool,
    subscriptions: Arc<SubscriptionController>,
    interest: Arc<ClientInterest>,
    running: Arc<AtomicBool>,
}

impl RelayHandle {
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Token governing every task of this relay
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops relaying, waits for every spawned task to exit and gives back
    /// every subscription reference the relay took
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.hook.close();

        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Relay task terminated abnormally");
            }
        }
        self.workers.join().await;

        let released = self.interest.release_all(&self.subscriptions).await;
        let global = ChannelAddress::global().channel();
        if let Err(e) = self.subscriptions.release(&global).await {
            warn!(error = %e, "Failed to release global channel");
        }

        self.running.store(false, Ordering::Release);
        info!(node_id = %self.node_id, released = released, "Cluster relay stopped");
    }
}

/// A client addressed through the cluster
#[derive(Clone)]
pub struct ClusterClient {
    id: String,
    dispatcher: Arc<Dispatcher>,
}

impl ClusterClient {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the client is connected to this node
    pub fn is_local(&self) -> bool {
        self.dispatcher.runtime().local_client(&self.id).is_some()
    }

    /// Publishes a custom event to the node(s) serving this client
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), RelayError> {
        self.dispatcher
            .publish(
                &ChannelAddress::for_client(&self.id),
                EventKind::Custom,
                name,
                payload,
            )
            .await
    }
}

/// A user addressed through the cluster
#[derive(Clone)]
pub struct ClusterUser {
    id: String,
    dispatcher: Arc<Dispatcher>,
}

impl ClusterUser {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether any of the user's clients is connected to this node
    pub fn is_local(&self) -> bool {
        self.dispatcher.runtime().local_user(&self.id).is_some()
    }

    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), RelayError> {
        self.dispatcher
            .publish(
                &ChannelAddress::for_user(&self.id),
                EventKind::Custom,
                name,
                payload,
            )
            .await
    }
}
