//! JSON REST handlers for enrollments.
//!
//! Listing, summaries, previews and manual enrollment hang off an
//! automation (`/api/automations/{id}/…`); the rest address a single
//! enrollment.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crmflow_app::automation_engine::{PreviewEntry, ProcessOutcome};
use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};
use crmflow_app::services::enrollment_service::EnrollmentSummary;
use crmflow_domain::enrollment::Enrollment;
use crmflow_domain::entity::EntityRef;
use crmflow_domain::id::{AutomationId, EnrollmentId};
use crmflow_domain::log::AutomationLog;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

/// Possible responses from endpoints returning one enrollment.
pub enum GetResponse {
    Ok(Json<Enrollment>),
    Created(Json<Enrollment>),
}

impl IntoResponse for GetResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<Enrollment>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

pub enum SummaryResponse {
    Ok(Json<EnrollmentSummary>),
}

impl IntoResponse for SummaryResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

pub enum PreviewResponse {
    Ok(Json<Vec<PreviewEntry>>),
}

impl IntoResponse for PreviewResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

pub enum ProcessResponse {
    Ok(Json<ProcessOutcome>),
}

impl IntoResponse for ProcessResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

pub enum LogsResponse {
    Ok(Json<Vec<AutomationLog>>),
}

impl IntoResponse for LogsResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `GET /api/automations/{id}/enrollments` — every enrollment, newest first.
pub async fn list<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<ListResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let enrollments = state
        .enrollment_service
        .list_enrollments(automation_id)
        .await?;
    Ok(ListResponse::Ok(Json(enrollments)))
}

/// `GET /api/automations/{id}/summary` — counts per status and failures.
pub async fn summary<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<SummaryResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let summary = state.enrollment_service.summary(automation_id).await?;
    Ok(SummaryResponse::Ok(Json(summary)))
}

/// `GET /api/automations/{id}/preview` — entities that would enroll now.
pub async fn preview<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<PreviewResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let entries = state.enrollment_service.preview(automation_id).await?;
    Ok(PreviewResponse::Ok(Json(entries)))
}

/// `POST /api/automations/{id}/enroll` — enroll one entity by hand.
///
/// Body: `{ "entity_type": "contact", "entity_id": "…" }`.
pub async fn enroll<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
    Json(entity): Json<EntityRef>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let enrollment = state
        .enrollment_service
        .enroll(automation_id, entity)
        .await?;
    Ok(GetResponse::Created(Json(enrollment)))
}

/// `GET /api/enrollments/{id}` — get enrollment by ID.
pub async fn get<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let enrollment_id: EnrollmentId = parse_id(&id)?;
    let enrollment = state
        .enrollment_service
        .get_enrollment(enrollment_id)
        .await?;
    Ok(GetResponse::Ok(Json(enrollment)))
}

/// `POST /api/enrollments/{id}/unenroll` — stop an enrollment.
pub async fn unenroll<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let enrollment_id: EnrollmentId = parse_id(&id)?;
    let enrollment = state.enrollment_service.unenroll(enrollment_id).await?;
    Ok(GetResponse::Ok(Json(enrollment)))
}

/// `POST /api/enrollments/{id}/process` — run one tick now.
pub async fn process<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<ProcessResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let enrollment_id: EnrollmentId = parse_id(&id)?;
    let outcome = state.enrollment_service.process(enrollment_id).await?;
    Ok(ProcessResponse::Ok(Json(outcome)))
}

/// `GET /api/enrollments/{id}/logs` — the enrollment's audit trail, oldest first.
pub async fn logs<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<LogsResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let enrollment_id: EnrollmentId = parse_id(&id)?;
    let logs = state
        .enrollment_service
        .enrollment_logs(enrollment_id)
        .await?;
    Ok(LogsResponse::Ok(Json(logs)))
}
