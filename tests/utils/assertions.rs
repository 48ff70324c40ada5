//! Test assertion helpers - fluent API for verifying what a node applied
#![allow(dead_code)] // Test utilities may not all be used in every test

use std::time::Duration;

use cluster_relay::{ChannelAddress, InMemoryRuntime, RemoteEvent, SystemEventName};

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Polls `condition` until it holds, failing the test after two seconds
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "timed out waiting for {what}");
}

pub struct RemoteEventAssertion<'a> {
    runtime: &'a InMemoryRuntime,
}

impl<'a> RemoteEventAssertion<'a> {
    pub fn for_runtime(runtime: &'a InMemoryRuntime) -> Self {
        Self { runtime }
    }

    /// Waits until `count` remote events have been applied
    pub async fn received(self, count: usize) -> Vec<(ChannelAddress, RemoteEvent)> {
        eventually(&format!("{count} remote events"), || {
            self.runtime.remote_events().len() >= count
        })
        .await;

        let events = self.runtime.remote_events();
        assert_eq!(events.len(), count, "unexpected extra remote events: {events:?}");
        events
    }

    /// Asserts nothing was applied after giving relaying a moment to happen
    pub async fn received_nothing(self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = self.runtime.remote_events();
        assert!(events.is_empty(), "expected no remote events, got {events:?}");
    }

    /// Waits until an event named `name` arrived on `channel` and returns it
    pub async fn received_on(self, channel: &ChannelAddress, name: SystemEventName) -> RemoteEvent {
        eventually(&format!("{} on {channel}", name.as_ref()), || {
            self.runtime
                .remote_events()
                .iter()
                .any(|(c, e)| c == channel && e.name() == name)
        })
        .await;

        self.runtime
            .remote_events()
            .into_iter()
            .find(|(c, e)| c == channel && e.name() == name)
            .map(|(_, e)| e)
            .unwrap()
    }
}
