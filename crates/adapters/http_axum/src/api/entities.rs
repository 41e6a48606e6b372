//! JSON REST handlers for contacts and deals.
//!
//! Every write publishes an entity event, which is what drives the
//! automations.

use std::collections::{BTreeMap, BTreeSet};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crmflow_app::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};
use crmflow_domain::entity::{CrmEntity, EntityKind, EntityPatch, EntityRef, FieldValue};
use crmflow_domain::event::EventOrigin;
use crmflow_domain::id::{EntityId, TenantId};
use crmflow_domain::time::now;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

/// Request body for creating an entity.
#[derive(Deserialize)]
pub struct CreateEntityRequest {
    pub tenant_id: TenantId,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Request body for patching an entity.
///
/// With `expected_version` set, the write fails with `409` when the entity
/// changed since that version was read.
#[derive(Deserialize)]
pub struct UpdateEntityRequest {
    #[serde(flatten)]
    pub patch: EntityPatch,
    pub expected_version: Option<u64>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub tenant_id: String,
    pub entity_type: String,
}

/// Possible responses from the list endpoint.
pub enum ListResponse {
    Ok(Json<Vec<CrmEntity>>),
}

impl IntoResponse for ListResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
        }
    }
}

/// Possible responses from the get and update endpoints.
pub enum GetResponse {
    Ok(Json<CrmEntity>),
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
    Created(Json<CrmEntity>),
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

fn entity_ref(kind: &str, id: &str) -> Result<EntityRef, ApiError> {
    Ok(EntityRef::new(parse_id(kind)?, parse_id::<EntityId>(id)?))
}

/// `GET /api/entities?tenant_id=&entity_type=` — list a tenant's contacts or deals.
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
    let kind: EntityKind = parse_id(&query.entity_type)?;
    let entities = state.entity_service.list_entities(tenant_id, kind).await?;
    Ok(ListResponse::Ok(Json(entities)))
}

/// `GET /api/entities/{type}/{id}` — get one contact or deal.
pub async fn get<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let entity = state
        .entity_service
        .get_entity(entity_ref(&kind, &id)?)
        .await?;
    Ok(GetResponse::Ok(Json(entity)))
}

/// `POST /api/entities` — create a contact or deal.
pub async fn create<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Json(req): Json<CreateEntityRequest>,
) -> Result<CreateResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let ts = now();
    let entity = CrmEntity {
        id: EntityId::new(),
        tenant_id: req.tenant_id,
        kind: req.entity_type,
        fields: req.fields,
        custom_fields: req.custom_fields,
        tags: req.tags,
        version: 0,
        created_at: ts,
        updated_at: ts,
    };
    let created = state.entity_service.create_entity(entity).await?;
    Ok(CreateResponse::Created(Json(created)))
}

/// `PATCH /api/entities/{type}/{id}` — write fields and add tags.
pub async fn update<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path((kind, id)): Path<(String, String)>,
    Json(req): Json<UpdateEntityRequest>,
) -> Result<GetResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    let updated = state
        .entity_service
        .update_entity(
            entity_ref(&kind, &id)?,
            req.patch,
            req.expected_version,
            EventOrigin::User,
        )
        .await?;
    Ok(GetResponse::Ok(Json(updated)))
}

/// `DELETE /api/entities/{type}/{id}` — delete a contact or deal.
pub async fn delete<A, N, L, S, P>(
    State(state): State<AppState<A, N, L, S, P>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<DeleteResponse, ApiError>
where
    A: AutomationRepository + Send + Sync + 'static,
    N: EnrollmentRepository + Send + Sync + 'static,
    L: AutomationLogRepository + Send + Sync + 'static,
    S: EntityStore + Send + Sync + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    state
        .entity_service
        .delete_entity(entity_ref(&kind, &id)?)
        .await?;
    Ok(DeleteResponse::NoContent)
}
