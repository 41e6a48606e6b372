//! Entity service — the CRM-side write path for contacts and deals.
//!
//! Every change made through this service, by a user or by an automation,
//! is published as an [`EntityEvent`] so the automation engine can react.

use crmflow_domain::entity::{
    CrmEntity, EntityKind, EntityPatch, EntityRef, EntitySchema, FieldChange,
};
use crmflow_domain::error::{CrmFlowError, NotFoundError};
use crmflow_domain::event::{EntityEvent, EventOrigin, EventType};
use crmflow_domain::id::TenantId;

use crate::ports::{EntityStore, EventPublisher, SharedClock};

/// Application service for entity CRUD and schema management.
pub struct EntityService<S, P> {
    store: S,
    publisher: P,
    clock: SharedClock,
}

impl<S, P> EntityService<S, P>
where
    S: EntityStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P, clock: SharedClock) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// Create an entity and publish `*_created`.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] if the entity uses a field its
    /// kind does not define, or a storage error from the store.
    #[tracing::instrument(skip(self, entity), fields(entity = %entity.entity_ref()))]
    pub async fn create_entity(&self, mut entity: CrmEntity) -> Result<CrmEntity, CrmFlowError> {
        entity.validate()?;
        let ts = self.clock.now();
        entity.version = 0;
        entity.created_at = ts;
        entity.updated_at = ts;
        let created = self.store.create(entity).await?;
        self.emit(
            EventType::created(created.kind),
            created.clone(),
            Vec::new(),
            EventOrigin::User,
        )
        .await;
        Ok(created)
    }

    /// Look up an entity, returning an error if not found.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the entity does not exist,
    /// or a storage error from the store.
    pub async fn get_entity(&self, entity: EntityRef) -> Result<CrmEntity, CrmFlowError> {
        self.store.get(entity).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Entity",
                id: entity.to_string(),
            }
            .into()
        })
    }

    /// List a tenant's entities of one kind.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the store.
    pub async fn list_entities(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> Result<Vec<CrmEntity>, CrmFlowError> {
        self.store.list(tenant_id, kind).await
    }

    /// Validate `patch` against the tenant schema and apply it.
    ///
    /// With `expected_version` the write is rejected when the entity moved
    /// on in the meantime. When anything changed, `*_updated` is published,
    /// followed by `deal_stage_changed` if the stage moved.
    ///
    /// # Errors
    ///
    /// - [`CrmFlowError::NotFound`] when the entity does not exist
    /// - [`CrmFlowError::Validation`] when the patch addresses something the
    ///   schema does not define
    /// - [`CrmFlowError::Conflict`] on a version mismatch
    #[tracing::instrument(skip(self, patch, origin), fields(entity = %entity))]
    pub async fn update_entity(
        &self,
        entity: EntityRef,
        patch: EntityPatch,
        expected_version: Option<u64>,
        origin: EventOrigin,
    ) -> Result<CrmEntity, CrmFlowError> {
        let current = self.get_entity(entity).await?;
        let schema = self.store.schema(current.tenant_id, current.kind).await?;
        patch.validate(current.kind, &schema)?;

        let update = self
            .store
            .update(entity, patch, expected_version, self.clock.now())
            .await?;
        if update.changes.is_empty() {
            return Ok(update.entity);
        }

        let stage_changed = update.changes.iter().any(|c| c.field == "stage");
        self.emit(
            EventType::updated(entity.kind),
            update.entity.clone(),
            update.changes.clone(),
            origin,
        )
        .await;
        if stage_changed && entity.kind == EntityKind::Deal {
            self.emit(
                EventType::DealStageChanged,
                update.entity.clone(),
                update.changes,
                origin,
            )
            .await;
        }
        Ok(update.entity)
    }

    /// Delete an entity and publish `*_deleted` with its last snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the entity does not exist,
    /// or a storage error from the store.
    #[tracing::instrument(skip(self))]
    pub async fn delete_entity(&self, entity: EntityRef) -> Result<(), CrmFlowError> {
        let deleted = self.store.delete(entity).await?.ok_or_else(|| NotFoundError {
            entity: "Entity",
            id: entity.to_string(),
        })?;
        self.emit(
            EventType::deleted(entity.kind),
            deleted,
            Vec::new(),
            EventOrigin::User,
        )
        .await;
        Ok(())
    }

    /// The tenant's schema for `kind`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the store.
    pub async fn schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
    ) -> Result<EntitySchema, CrmFlowError> {
        self.store.schema(tenant_id, kind).await
    }

    /// Replace the tenant's schema for `kind`.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the store.
    #[tracing::instrument(skip(self, schema))]
    pub async fn put_schema(
        &self,
        tenant_id: TenantId,
        kind: EntityKind,
        schema: EntitySchema,
    ) -> Result<EntitySchema, CrmFlowError> {
        self.store.put_schema(tenant_id, kind, schema).await
    }

    async fn emit(
        &self,
        event_type: EventType,
        entity: CrmEntity,
        changes: Vec<FieldChange>,
        origin: EventOrigin,
    ) {
        let event = EntityEvent::new(event_type, entity, changes, origin, self.clock.now());
        if let Err(err) = self.publisher.publish(event).await {
            tracing::warn!(error = %err, %event_type, "failed to publish entity event");
        }
    }
}
