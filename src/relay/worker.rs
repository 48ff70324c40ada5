//! # Relay worker pool
//!
//! A fixed number of workers pull from the single inbound broker stream and
//! dispatch each message to completion before pulling the next one.
//!
//! ```text
//!                      ┌──► worker 0 ──► Dispatcher::handle_message()
//! broker ──► inbound ──┼──► worker 1 ──► Dispatcher::handle_message()
//!            stream    └──► worker N ──► Dispatcher::handle_message()
//! ```
//!
//! ## Rules
//! - **Shared stream only**: workers share nothing mutable besides the stream
//! - **Cooperative shutdown**: cancellation is observed between messages, an
//!   in-flight dispatch always finishes
//! - **Isolation**: a panicking hook is logged and the worker moves on

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use crate::broker::InboundStream;

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) on the current runtime
    #[must_use]
    pub fn spawn(
        size: usize,
        inbound: InboundStream,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        let size = size.max(1);
        let workers = (0..size)
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    inbound.clone(),
                    Arc::clone(&dispatcher),
                    shutdown.clone(),
                ))
            })
            .collect();

        info!(workers = size, "Relay worker pool started");
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit
    pub async fn join(self) {
        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!(error = %e, "Relay worker terminated abnormally");
            }
        }
    }
}

async fn run_worker(
    index: usize,
    inbound: InboundStream,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    debug!(worker = index, "Relay worker started");

    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = inbound.recv() => message,
        };

        let Some(message) = message else {
            info!(worker = index, "Inbound stream closed");
            break;
        };

        let dispatch = AssertUnwindSafe(dispatcher.handle_message(&message))
            .catch_unwind()
            .await;

        match dispatch {
            Ok(outcome) => {
                debug!(worker = index, channel = %message.channel, outcome = ?outcome, "Message handled");
            }
            Err(panic) => {
                dispatcher.stats().record_handler_panic();
                error!(
                    worker = index,
                    channel = %message.channel,
                    panic = %panic_message(panic.as_ref()),
                    "Handler panicked while dispatching message"
                );
            }
        }
    }

    debug!(worker = index, "Relay worker stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
