//! In-process publication of collection updates

use log::trace;
use shared::{CollectionUpdateNotification, PlayerId};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 1024;

/// Fire-and-forget fan-out to every in-process subscriber.
///
/// Publishing never suspends: the event is queued for each live receiver
/// before `publish` returns.
pub struct LocalEventBus {
    tx: broadcast::Sender<CollectionUpdateNotification>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: CollectionUpdateNotification) {
        // An error only means nobody is listening right now
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(
            "Published {} update for {:?} to {} subscribers",
            event.resource,
            event.subject,
            delivered
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionUpdateNotification> {
        self.tx.subscribe()
    }

    /// Receiver that only yields updates addressed to `player`
    pub fn subscribe_for(&self, player: PlayerId) -> SubjectReceiver {
        SubjectReceiver {
            player,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SubjectReceiver {
    player: PlayerId,
    rx: broadcast::Receiver<CollectionUpdateNotification>,
}

impl SubjectReceiver {
    pub async fn recv(&mut self) -> Option<CollectionUpdateNotification> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.subject == Some(self.player) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next queued update for this player without waiting
    pub fn try_recv(&mut self) -> Option<CollectionUpdateNotification> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if event.subject == Some(self.player) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ResourceType;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = LocalEventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(CollectionUpdateNotification::new(None, ResourceType::Ore, 0));
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = LocalEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let event = CollectionUpdateNotification::new(None, ResourceType::Sand, 7);
        bus.publish(event);

        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap(), event);
        assert!(first.try_recv().is_err());
    }

    #[test]
    fn test_subject_receiver_filters() {
        let bus = LocalEventBus::new();
        let me = PlayerId::random();
        let other = PlayerId::random();
        let mut mine = bus.subscribe_for(me);

        bus.publish(CollectionUpdateNotification::new(Some(other), ResourceType::Wood, 1));
        bus.publish(CollectionUpdateNotification::new(None, ResourceType::Wood, 2));
        bus.publish(CollectionUpdateNotification::new(Some(me), ResourceType::Wood, 3));

        let received = mine.try_recv().unwrap();
        assert_eq!(received.previous, 3);
        assert!(mine.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_subject_receiver_async() {
        let bus = LocalEventBus::new();
        let me = PlayerId::random();
        let mut mine = bus.subscribe_for(me);

        bus.publish(CollectionUpdateNotification::new(Some(me), ResourceType::Coal, 9));

        let received = mine.recv().await.unwrap();
        assert_eq!(received.resource, ResourceType::Coal);
    }
}
