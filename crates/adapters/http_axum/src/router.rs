//! Axum router assembly.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};

use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// Mounts the JSON API under `/api` next to `/health`, with a
/// [`TraceLayer`] that logs each HTTP request/response at the `DEBUG` level.
pub fn build<A, N, L, S, P>(state: AppState<A, N, L, S, P>) -> Router
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", crate::api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use crmflow_app::action_executor::ActionExecutor;
    use crmflow_app::automation_catalog::AutomationCatalog;
    use crmflow_app::automation_engine::AutomationEngine;
    use crmflow_app::event_bus::InProcessEventBus;
    use crmflow_app::memory::{
        InMemoryAutomationLogRepository, InMemoryAutomationRepository,
        InMemoryEnrollmentRepository, InMemoryEntityStore,
    };
    use crmflow_app::ports::{SharedClock, SystemClock};
    use crmflow_app::services::automation_service::AutomationService;
    use crmflow_app::services::enrollment_service::EnrollmentService;
    use crmflow_app::services::entity_service::EntityService;
    use crmflow_app::step_machine::StepMachine;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        let clock: SharedClock = Arc::new(SystemClock);
        let automations = Arc::new(InMemoryAutomationRepository::default());
        let logs = Arc::new(InMemoryAutomationLogRepository::default());
        let catalog = Arc::new(AutomationCatalog::default());
        let entities = Arc::new(EntityService::new(
            Arc::new(InMemoryEntityStore::default()),
            Arc::new(InProcessEventBus::new(16)),
            Arc::clone(&clock),
        ));
        let machine = StepMachine::new(
            Arc::new(ActionExecutor::new(Arc::clone(&entities))),
            Arc::clone(&clock),
        );
        let engine = Arc::new(AutomationEngine::new(
            Arc::clone(&automations),
            Arc::new(InMemoryEnrollmentRepository::default()),
            Arc::clone(&logs),
            Arc::clone(&entities),
            machine,
            Arc::clone(&catalog),
            Arc::clone(&clock),
        ));
        let state = AppState::from_arcs(
            Arc::new(AutomationService::new(automations, logs, catalog, clock)),
            Arc::new(EnrollmentService::new(engine)),
            entities,
        );
        build(state)
    }

    #[tokio::test]
    async fn should_return_ok_when_health_check_called() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn should_return_bad_request_when_id_is_malformed() {
        let response = app()
            .oneshot(
                Request::get("/api/automations/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("not-a-uuid"));
    }

    #[tokio::test]
    async fn should_return_not_found_for_unknown_enrollment() {
        let uri = format!(
            "/api/enrollments/{}",
            crmflow_domain::id::EnrollmentId::new()
        );
        let response = app()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
