//! JSON REST handlers for automations.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};
use crmflow_domain::automation::{
    Action, Automation, AutomationStep, Condition, ReEnrollmentPolicy, Trigger, WorkflowReport,
};
use crmflow_domain::id::{AutomationId, TenantId};
use crmflow_domain::log::AutomationLog;
use crmflow_domain::time::now;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

/// The editable part of an automation, shared by create, update and
/// draft validation.
#[derive(Deserialize)]
pub struct AutomationDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: Option<bool>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub steps: Vec<AutomationStep>,
    /// Defaults to `true` when `steps` is non-empty.
    pub multi_step: Option<bool>,
    #[serde(default)]
    pub re_enrollment: ReEnrollmentPolicy,
}

impl AutomationDefinition {
    /// Build the automation without checking it; the service decides what
    /// is acceptable.
    fn into_automation(self, id: AutomationId, tenant_id: TenantId) -> Automation {
        let ts = now();
        Automation {
            id,
            tenant_id,
            name: self.name,
            description: self.description,
            enabled: self.enabled.unwrap_or(true),
            trigger: self.trigger,
            conditions: self.conditions,
            actions: self.actions,
            multi_step: self.multi_step.unwrap_or(!self.steps.is_empty()),
            steps: self.steps,
            re_enrollment: self.re_enrollment,
            created_at: ts,
            updated_at: ts,
            last_triggered: None,
        }
    }
}

/// Request body for creating an automation.
#[derive(Deserialize)]
pub struct CreateAutomationRequest {
    pub tenant_id: TenantId,
    #[serde(flatten)]
    pub definition: AutomationDefinition,
}

/// Request body for enabling or disabling an automation.
#[derive(Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub tenant_id: String,
}

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<Automation>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the get, update and toggle endpoints.
pub enum GetResponse {
    Ok(Json<Automation>),
}

impl IntoResponse for GetResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the create endpoint.
pub enum CreateResponse {
    Created(Json<Automation>),
}

impl IntoResponse for CreateResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Possible responses from the delete endpoint.
pub enum DeleteResponse {
    NoContent,
}

impl IntoResponse for DeleteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::NoContent => StatusCode::NO_CONTENT.into_response(),
        }
    }
}

/// Possible responses from the validate endpoints.
pub enum ValidateResponse {
    Ok(Json<WorkflowReport>),
}

impl IntoResponse for ValidateResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the logs endpoint.
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

/// `GET /api/automations?tenant_id=` — list a tenant's automations.
pub async fn list<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Query(query): Query<ListQuery>,
) -> Result<ListResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let tenant_id: TenantId = parse_id(&query.tenant_id)?;
    let automations = state.automation_service.list_automations(tenant_id).await?;
    Ok(ListResponse::Ok(Json(automations)))
}

/// `GET /api/automations/{id}` — get automation by ID.
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
    let automation_id: AutomationId = parse_id(&id)?;
    let automation = state
        .automation_service
        .get_automation(automation_id)
        .await?;
    Ok(GetResponse::Ok(Json(automation)))
}

/// `POST /api/automations` — create a new automation.
pub async fn create<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Json(req): Json<CreateAutomationRequest>,
) -> Result<CreateResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation = req
        .definition
        .into_automation(AutomationId::new(), req.tenant_id);
    let created = state
        .automation_service
        .create_automation(automation)
        .await?;
    Ok(CreateResponse::Created(Json(created)))
}

/// `PUT /api/automations/{id}` — replace an automation's definition.
pub async fn update<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
    Json(req): Json<AutomationDefinition>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let stored = state
        .automation_service
        .get_automation(automation_id)
        .await?;
    let updated = state
        .automation_service
        .update_automation(req.into_automation(automation_id, stored.tenant_id))
        .await?;
    Ok(GetResponse::Ok(Json(updated)))
}

/// `POST /api/automations/{id}/toggle` — enable or disable an automation.
pub async fn toggle<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let toggled = state
        .automation_service
        .toggle_automation(automation_id, req.enabled)
        .await?;
    Ok(GetResponse::Ok(Json(toggled)))
}

/// `DELETE /api/automations/{id}` — delete an automation.
pub async fn delete<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<DeleteResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    state
        .automation_service
        .delete_automation(automation_id)
        .await?;
    Ok(DeleteResponse::NoContent)
}

/// `POST /api/automations/validate` — check an unsaved draft.
pub async fn validate_draft<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Json(req): Json<AutomationDefinition>,
) -> Result<ValidateResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let draft = req.into_automation(AutomationId::new(), TenantId::new());
    let report = state.automation_service.validate_workflow(&draft);
    Ok(ValidateResponse::Ok(Json(report)))
}

/// `GET /api/automations/{id}/validate` — check a stored automation.
pub async fn validate<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
) -> Result<ValidateResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let automation = state
        .automation_service
        .get_automation(automation_id)
        .await?;
    let report = state.automation_service.validate_workflow(&automation);
    Ok(ValidateResponse::Ok(Json(report)))
}

/// `GET /api/automations/{id}/logs?limit=` — most recent runs, newest first.
pub async fn logs<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<LogsResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let automation_id: AutomationId = parse_id(&id)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    let logs = state
        .automation_service
        .automation_logs(automation_id, limit)
        .await?;
    Ok(LogsResponse::Ok(Json(logs)))
}
