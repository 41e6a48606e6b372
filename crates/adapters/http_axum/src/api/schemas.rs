//! JSON REST handlers for tenant entity schemas.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};
use crmflow_domain::entity::{EntityKind, EntitySchema};
use crmflow_domain::id::TenantId;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

pub enum SchemaResponse {
    Ok(Json<EntitySchema>),
}

impl IntoResponse for SchemaResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// `GET /api/tenants/{tenant_id}/schemas/{type}` — custom fields, stages and tags.
pub async fn get<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path((tenant_id, kind)): Path<(String, String)>,
) -> Result<SchemaResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let tenant_id: TenantId = parse_id(&tenant_id)?;
    let kind: EntityKind = parse_id(&kind)?;
    let schema = state.entity_service.schema(tenant_id, kind).await?;
    Ok(SchemaResponse::Ok(Json(schema)))
}

/// `PUT /api/tenants/{tenant_id}/schemas/{type}` — replace the schema.
pub async fn put<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path((tenant_id, kind)): Path<(String, String)>,
    Json(schema): Json<EntitySchema>,
) -> Result<SchemaResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let tenant_id: TenantId = parse_id(&tenant_id)?;
    let kind: EntityKind = parse_id(&kind)?;
    let stored = state
        .entity_service
        .put_schema(tenant_id, kind, schema)
        .await?;
    Ok(SchemaResponse::Ok(Json(stored)))
}
