//! Shared application state for axum handlers.

use std::sync::Arc;

use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};
use crmflow_app::services::automation_service::AutomationService;
use crmflow_app::services::enrollment_service::EnrollmentService;
use crmflow_app::services::entity_service::EntityService;

/// Application state shared across all axum handlers.
///
/// Generic over the automation repository `A`, enrollment repository `N`,
/// log repository `L`, entity store `S` and event publisher `P` to avoid
/// dynamic dispatch. `Clone` is implemented manually so the underlying types
/// themselves do not need to be `Clone`; only the `Arc` wrappers are cloned.
pub struct AppState<A, N, L, S, P> {
    /// Automation CRUD, validation and logs.
    pub automation_service: Arc<AutomationService<A, L>>,
    /// Enrollment inspection and manual control.
    pub enrollment_service: Arc<EnrollmentService<A, N, L, S, P>>,
    /// Contacts, deals and their schemas.
    pub entity_service: Arc<EntityService<S, P>>,
}

impl<A, N, L, S, P> Clone for AppState<A, N, L, S, P> {
    fn clone(&self) -> Self {
        Self {
            automation_service: Arc::clone(&self.automation_service),
            enrollment_service: Arc::clone(&self.enrollment_service),
            entity_service: Arc::clone(&self.entity_service),
        }
    }
}

impl<A, N, L, S, P> AppState<A, N, L, S, P>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    /// Create a new application state from pre-wrapped `Arc` services.
    ///
    /// The entity service is shared with the engine, so it is always passed
    /// in already wrapped.
    pub fn from_arcs(
        automation_service: Arc<AutomationService<A, L>>,
        enrollment_service: Arc<EnrollmentService<A, N, L, S, P>>,
        entity_service: Arc<EntityService<S, P>>,
    ) -> Self {
        Self {
            automation_service,
            enrollment_service,
            entity_service,
        }
    }
}
