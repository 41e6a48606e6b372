//! JSON REST API handler modules.

#[allow(clippy::missing_errors_doc)]
pub mod automations;
#[allow(clippy::missing_errors_doc)]
pub mod enrollments;
#[allow(clippy::missing_errors_doc)]
pub mod entities;
#[allow(clippy::missing_errors_doc)]
pub mod schemas;

use std::str::FromStr;

use axum::Router;
use axum::routing::{get, post};

use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};
use crmflow_domain::error::ValidationError;

use crate::error::ApiError;
use crate::state::AppState;

/// Parse a path or query identifier, answering `400` when it is malformed.
pub(crate) fn parse_id<T: FromStr>(raw: &str) -> Result<T, ApiError> {
    T::from_str(raw).map_err(|_| ApiError::from(ValidationError::InvalidId(raw.to_string())))
}

/// Build the `/api` sub-router.
pub fn routes<A, N, L, S, P>() -> Router<AppState<A, N, L, S, P>>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    Router::new()
        // Automations
        .route(
            "/automations",
            get(automations::list::<A, N, L, S, P>).post(automations::create::<A, N, L, S, P>),
        )
        .route(
            "/automations/validate",
            post(automations::validate_draft::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}",
            get(automations::get::<A, N, L, S, P>)
                .put(automations::update::<A, N, L, S, P>)
                .delete(automations::delete::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/toggle",
            post(automations::toggle::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/validate",
            get(automations::validate::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/logs",
            get(automations::logs::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/preview",
            get(enrollments::preview::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/enrollments",
            get(enrollments::list::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/summary",
            get(enrollments::summary::<A, N, L, S, P>),
        )
        .route(
            "/automations/{id}/enroll",
            post(enrollments::enroll::<A, N, L, S, P>),
        )
        // Enrollments
        .route("/enrollments/{id}", get(enrollments::get::<A, N, L, S, P>))
        .route(
            "/enrollments/{id}/unenroll",
            post(enrollments::unenroll::<A, N, L, S, P>),
        )
        .route(
            "/enrollments/{id}/process",
            post(enrollments::process::<A, N, L, S, P>),
        )
        .route(
            "/enrollments/{id}/logs",
            get(enrollments::logs::<A, N, L, S, P>),
        )
        // Entities
        .route(
            "/entities",
            get(entities::list::<A, N, L, S, P>).post(entities::create::<A, N, L, S, P>),
        )
        .route(
            "/entities/{kind}/{id}",
            get(entities::get::<A, N, L, S, P>)
                .patch(entities::update::<A, N, L, S, P>)
                .delete(entities::delete::<A, N, L, S, P>),
        )
        // Schemas
        .route(
            "/tenants/{tenant_id}/schemas/{kind}",
            get(schemas::get::<A, N, L, S, P>).put(schemas::put::<A, N, L, S, P>),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmflow_domain::entity::EntityKind;
    use crmflow_domain::id::AutomationId;

    #[test]
    fn should_parse_valid_identifiers() {
        let id = AutomationId::new();
        let parsed: AutomationId = parse_id(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        let kind: EntityKind = parse_id("deals").unwrap();
        assert_eq!(kind, EntityKind::Deal);
    }

    #[test]
    fn should_reject_malformed_identifier() {
        assert!(parse_id::<AutomationId>("42").is_err());
    }
}
