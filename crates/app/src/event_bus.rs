//! In-process event bus backed by a tokio broadcast channel.
//!
//! Every entity write publishes here; the engine's listener is the main
//! subscriber. A subscriber that falls more than `capacity` events behind
//! loses the oldest ones and is told how many it missed.

use std::future::Future;

use tokio::sync::broadcast;

use crmflow_domain::error::CrmFlowError;
use crmflow_domain::event::EntityEvent;

use crate::ports::EventPublisher;

pub struct InProcessEventBus {
    sender: broadcast::Sender<EntityEvent>,
}

impl InProcessEventBus {
    /// Create a bus buffering at most `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventPublisher for InProcessEventBus {
    fn publish(&self, event: EntityEvent) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        let event_type = event.event_type;
        let entity = event.entity.entity_ref();
        // publishing never fails the write that produced the event
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::trace!(%event_type, %entity, receivers, "event published");
            }
            Err(_) => {
                tracing::debug!(%event_type, %entity, "no subscriber, event dropped");
            }
        }
        async { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmflow_domain::entity::{CrmEntity, EntityKind};
    use crmflow_domain::event::{EventOrigin, EventType};
    use crmflow_domain::time::now;

    fn contact_event(event_type: EventType) -> EntityEvent {
        let entity = CrmEntity::builder()
            .kind(EntityKind::Contact)
            .build()
            .unwrap();
        EntityEvent::new(event_type, entity, vec![], EventOrigin::User, now())
    }

    #[tokio::test]
    async fn should_fan_out_to_every_subscriber() {
        let bus = InProcessEventBus::new(16);
        let mut engine = bus.subscribe();
        let mut audit = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = contact_event(EventType::ContactUpdated);
        let event_id = event.id;
        bus.publish(event).await.unwrap();

        assert_eq!(engine.recv().await.unwrap().id, event_id);
        assert_eq!(audit.recv().await.unwrap().id, event_id);
    }

    #[tokio::test]
    async fn should_accept_events_when_nobody_listens() {
        let bus = InProcessEventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(
            bus.publish(contact_event(EventType::ContactDeleted))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn should_only_deliver_events_published_after_subscribing() {
        let bus = InProcessEventBus::new(16);
        bus.publish(contact_event(EventType::ContactCreated))
            .await
            .unwrap();

        let mut rx = bus.subscribe();
        let later = contact_event(EventType::ContactUpdated);
        let later_id = later.id;
        bus.publish(later).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, later_id);
        assert_eq!(received.event_type, EventType::ContactUpdated);
    }

    #[tokio::test]
    async fn should_report_missed_events_when_subscriber_lags() {
        let bus = InProcessEventBus::new(1);
        let mut slow = bus.subscribe();
        bus.publish(contact_event(EventType::ContactCreated))
            .await
            .unwrap();
        let newest = contact_event(EventType::ContactUpdated);
        let newest_id = newest.id;
        bus.publish(newest).await.unwrap();

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(slow.recv().await.unwrap().id, newest_id);
    }
}
