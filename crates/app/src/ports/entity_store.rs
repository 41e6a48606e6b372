//! Entity store port — the CRM's contacts and deals, seen from the engine.
//!
//! The store is owned by the wider CRM; the engine only reads snapshots and
//! writes patches through it.

use std::future::Future;
use std::sync::Arc;

use crmflow_domain::entity::{CrmEntity, EntityKind, EntityPatch, EntityRef, EntitySchema, FieldChange};
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::TenantId;
use crmflow_domain::time::Timestamp;

/// Result of an applied patch.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    pub entity: CrmEntity,
    /// Empty when the patch did not change anything.
    pub changes: Vec<FieldChange>,
}

/// Storage for [`CrmEntity`] records and per-tenant [`EntitySchema`]s.
pub trait EntityStore {
    fn get(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send;

    fn list(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<CrmEntity>, CrmFlowError>> + Send;

    fn create(
        &self,
        entity: CrmEntity,
    ) -> impl Future<Output = Result<CrmEntity, CrmFlowError>> + Send;

    /// Apply `patch` in one atomic read-modify-write.
    ///
    /// When `expected_version` is given and differs from the stored version,
    /// nothing is written and [`CrmFlowError::Conflict`] is returned. A
    /// missing entity yields [`CrmFlowError::NotFound`].
    fn update(
        &self,
        entity: EntityRef,
        patch: EntityPatch,
        expected_version: Option<u64>,
        at: Timestamp,
    ) -> impl Future<Output = Result<EntityUpdate, CrmFlowError>> + Send;

    /// Delete and return the last snapshot, or `None` if it did not exist.
    fn delete(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send;

    /// The tenant's schema for `kind`; empty when none was stored.
    fn schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send;

    fn put_schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        schema: EntitySchema,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send;
}

impl<T: EntityStore + Send + Sync> EntityStore for Arc<T> {
    fn get(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send {
        (**self).get(entity)
    }

    fn list(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<Vec<CrmEntity>, CrmFlowError>> + Send {
        (**self).list(tenant_id, kind)
    }

    fn create(
        &self,
        entity: CrmEntity,
    ) -> impl Future<Output = Result<CrmEntity, CrmFlowError>> + Send {
        (**self).create(entity)
    }

    fn update(
        &self,
        entity: EntityRef,
        patch: EntityPatch,
        expected_version: Option<u64>,
        at: Timestamp,
    ) -> impl Future<Output = Result<EntityUpdate, CrmFlowError>> + Send {
        (**self).update(entity, patch, expected_version, at)
    }

    fn delete(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<CrmEntity>, CrmFlowError>> + Send {
        (**self).delete(entity)
    }

    fn schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send {
        (**self).schema(tenant_id, kind)
    }

    fn put_schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        schema: EntitySchema,
    ) -> impl Future<Output = Result<EntitySchema, CrmFlowError>> + Send {
        (**self).put_schema(tenant_id, kind, schema)
    }
}
