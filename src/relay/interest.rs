use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::event::{ChannelAddress, ClientInfo};
use crate::subscription::SubscriptionController;

/// Subscription references held on behalf of local clients
///
/// Only references that were actually acquired are recorded, so a disconnect
/// releases exactly what the matching connect took and never a reference held
/// by another client of the same user.
#[derive(Default)]
pub struct ClientInterest {
    held: Mutex<HashMap<String, Vec<String>>>,
}

impl ClientInterest {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(client: &ClientInfo) -> Vec<String> {
        let mut channels = vec![ChannelAddress::for_client(&client.id).channel()];
        if let Some(user_id) = &client.user_id {
            channels.push(ChannelAddress::for_user(user_id).channel());
        }
        channels
    }

    /// Subscribes the client's channels and returns how many were acquired
    ///
    /// A client that is already followed is left untouched.
    pub async fn follow(&self, subscriptions: &SubscriptionController, client: &ClientInfo) -> usize {
        let mut held = self.held.lock().await;
        if held.contains_key(&client.id) {
            debug!(client_id = %client.id, "Client already followed");
            return 0;
        }

        let mut acquired = Vec::new();
        for channel in Self::channels(client) {
            match subscriptions.subscribe(&channel).await {
                Ok(()) => acquired.push(channel),
                Err(e) => {
                    warn!(client_id = %client.id, channel = %channel, error = %e, "Failed to follow client channel");
                }
            }
        }

        let count = acquired.len();
        if count > 0 {
            held.insert(client.id.clone(), acquired);
        }
        count
    }

    /// Releases whatever `follow` acquired for the client
    pub async fn unfollow(&self, subscriptions: &SubscriptionController, client_id: &str) -> usize {
        let Some(channels) = self.held.lock().await.remove(client_id) else {
            debug!(client_id = %client_id, "Client was not followed, nothing to release");
            return 0;
        };

        Self::release(subscriptions, client_id, channels).await
    }

    /// Releases every reference still held; used when the relay stops
    pub async fn release_all(&self, subscriptions: &SubscriptionController) -> usize {
        let drained: Vec<(String, Vec<String>)> = self.held.lock().await.drain().collect();

        let mut released = 0;
        for (client_id, channels) in drained {
            released += Self::release(subscriptions, &client_id, channels).await;
        }
        released
    }

    async fn release(
        subscriptions: &SubscriptionController,
        client_id: &str,
        channels: Vec<String>,
    ) -> usize {
        let mut released = 0;
        for channel in channels {
            match subscriptions.release(&channel).await {
                Ok(()) => released += 1,
                Err(e) => {
                    warn!(client_id = %client_id, channel = %channel, error = %e, "Failed to release client channel");
                }
            }
        }
        released
    }

    /// Channels currently held for `client_id`
    pub async fn channels_of(&self, client_id: &str) -> Option<Vec<String>> {
        self.held.lock().await.get(client_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.held.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryHub;
    use std::sync::Arc;

    fn controller(max: usize) -> SubscriptionController {
        SubscriptionController::new(Arc::new(MemoryHub::new().connect()), max)
    }

    #[tokio::test]
    async fn test_disconnect_of_unfollowed_client_keeps_shared_user_channel() {
        let subscriptions = controller(8);
        let interest = ClientInterest::new();

        interest
            .follow(&subscriptions, &ClientInfo::new("c1").with_user("u1"))
            .await;

        // c0 connected before anything was tracked
        assert_eq!(interest.unfollow(&subscriptions, "c0").await, 0);
        assert_eq!(subscriptions.ref_count("user:u1").await, Some(1));
    }

    #[tokio::test]
    async fn test_only_acquired_channels_are_released() {
        // Room for global plus one client channel and the shared user channel
        let subscriptions = controller(3);
        let interest = ClientInterest::new();
        subscriptions.subscribe("global").await.unwrap();

        interest
            .follow(&subscriptions, &ClientInfo::new("c1").with_user("u1"))
            .await;
        let acquired = interest
            .follow(&subscriptions, &ClientInfo::new("c2").with_user("u1"))
            .await;

        assert_eq!(acquired, 1);
        assert_eq!(interest.channels_of("c2").await, Some(vec!["user:u1".to_string()]));
        assert_eq!(subscriptions.ref_count("client:c2").await, None);

        interest.unfollow(&subscriptions, "c2").await;
        assert_eq!(subscriptions.ref_count("user:u1").await, Some(1));
        assert_eq!(subscriptions.ref_count("client:c1").await, Some(1));
    }

    #[tokio::test]
    async fn test_follow_is_idempotent_per_client() {
        let subscriptions = controller(8);
        let interest = ClientInterest::new();
        let client = ClientInfo::new("c1").with_user("u1");

        assert_eq!(interest.follow(&subscriptions, &client).await, 2);
        assert_eq!(interest.follow(&subscriptions, &client).await, 0);
        assert_eq!(subscriptions.ref_count("client:c1").await, Some(1));

        assert_eq!(interest.unfollow(&subscriptions, "c1").await, 2);
        assert_eq!(interest.unfollow(&subscriptions, "c1").await, 0);
        assert_eq!(subscriptions.ref_count("client:c1").await, Some(0));
    }

    #[tokio::test]
    async fn test_release_all_drains_every_client() {
        let subscriptions = controller(8);
        let interest = ClientInterest::new();

        interest
            .follow(&subscriptions, &ClientInfo::new("c1").with_user("u1"))
            .await;
        interest
            .follow(&subscriptions, &ClientInfo::new("c2").with_user("u1"))
            .await;

        assert_eq!(interest.release_all(&subscriptions).await, 4);
        assert!(interest.is_empty().await);
        for topic in subscriptions.topics().await {
            assert_eq!(subscriptions.ref_count(&topic).await, Some(0), "{topic} still referenced");
        }
    }
}
