use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::controller::SubscriptionController;

/// Configuration for the sweep task
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often to run the sweep
    pub sweep_interval: Duration,
    /// How long an unreferenced topic must be idle before it is unsubscribed
    pub idle_threshold: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            idle_threshold: Duration::from_secs(60),
        }
    }
}

/// Runs the periodic sweep until `shutdown` is cancelled
#[instrument(skip(controller, shutdown))]
pub async fn run_sweeper(
    controller: Arc<SubscriptionController>,
    config: SweepConfig,
    shutdown: CancellationToken,
) {
    info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        idle_threshold_secs = config.idle_threshold.as_secs(),
        "Starting subscription sweep task"
    );

    let mut ticker = interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and there is nothing idle yet
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let reclaimed = controller.sweep(Utc::now(), config.idle_threshold).await;
        if reclaimed.is_empty() {
            debug!("Sweep completed with nothing to reclaim");
        } else {
            info!(reclaimed = reclaimed.len(), "Sweep completed");
        }
    }

    info!("Subscription sweep task stopped");
}
