//! Best-effort delivery of collection updates to other processes

use crate::error::ChannelError;
use async_trait::async_trait;
use log::{debug, warn};
use shared::{CollectionUpdateNotification, Packet, ProcessId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[async_trait]
pub trait InterProcessChannel: Send + Sync {
    async fn send(&self, process: ProcessId, packet: Packet) -> Result<(), ChannelError>;
}

/// At-most-once notifier: one attempt per notification, failures are logged
/// and dropped. A lost cosmetic update to a teammate is acceptable.
pub struct RemoteNotifier {
    channel: Arc<dyn InterProcessChannel>,
    delivery_timeout: Duration,
}

impl RemoteNotifier {
    pub fn new(channel: Arc<dyn InterProcessChannel>, delivery_timeout: Duration) -> Self {
        Self {
            channel,
            delivery_timeout,
        }
    }

    /// Returns whether the channel accepted the notification.
    pub async fn notify(&self, process: ProcessId, notification: CollectionUpdateNotification) -> bool {
        let packet = Packet::CollectionUpdate { notification };

        match timeout(self.delivery_timeout, self.channel.send(process, packet)).await {
            Ok(Ok(())) => {
                debug!(
                    "Delivered {} update for {:?} to {}",
                    notification.resource, notification.subject, process
                );
                true
            }
            Ok(Err(e)) => {
                warn!("Dropping update for {:?} to {}: {}", notification.subject, process, e);
                false
            }
            Err(_) => {
                warn!(
                    "Dropping update for {:?} to {}: timed out after {:?}",
                    notification.subject, process, self.delivery_timeout
                );
                false
            }
        }
    }
}
