//! Event bus port — publish/subscribe for entity events.

use std::future::Future;

use crmflow_domain::error::CrmFlowError;
use crmflow_domain::event::EntityEvent;

/// Publishes entity events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: EntityEvent) -> impl Future<Output = Result<(), CrmFlowError>> + Send;
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: EntityEvent) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        (**self).publish(event)
    }
}
