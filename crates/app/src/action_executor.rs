//! Action executor — applies one automation action to its entity.
//!
//! Each action becomes a single [`EntityPatch`](crmflow_domain::entity::EntityPatch)
//! written through [`EntityService`] with the entity's version as the
//! expected version. On a version conflict the entity is re-read and the
//! patch rebuilt, up to `conflict_retries` times.

use std::sync::Arc;

use crmflow_domain::automation::{Action, DelayConfig};
use crmflow_domain::entity::{CrmEntity, EntityRef};
use crmflow_domain::error::{CrmFlowError, ValidationError};
use crmflow_domain::event::EventOrigin;
use crmflow_domain::id::AutomationId;

use crate::ports::{EntityStore, EventPublisher};
use crate::services::entity_service::EntityService;

/// Why a step could not be carried out.
///
/// Everything but [`ExecutionFailure::Storage`] fails the enrollment; a
/// storage failure interrupts the tick and the next sweep resumes at the
/// step that hit it.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("schema drift: {0}")]
    SchemaDrift(#[source] ValidationError),

    #[error("entity {0} no longer exists")]
    EntityMissing(EntityRef),

    #[error("entity {entity} kept changing concurrently ({attempts} attempts)")]
    ConflictRetriesExhausted { entity: EntityRef, attempts: u32 },

    #[error("step {step_index} exceeded its {budget:?} budget")]
    StepTimeout {
        step_index: usize,
        budget: std::time::Duration,
    },

    #[error("step {0} does not exist")]
    StepMissing(usize),

    #[error("step {step_index} schedules past the supported calendar ({delay})")]
    DelayOutOfRange { step_index: usize, delay: DelayConfig },

    #[error(transparent)]
    Storage(CrmFlowError),
}

/// Default number of re-reads after a version conflict.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 2;

pub struct ActionExecutor<S, P> {
    entities: Arc<EntityService<S, P>>,
    conflict_retries: u32,
}

impl<S, P> ActionExecutor<S, P>
where
    S: EntityStore,
    P: EventPublisher,
{
    pub fn new(entities: Arc<EntityService<S, P>>) -> Self {
        Self {
            entities,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    #[must_use]
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Apply `action` to `entity` on behalf of `automation_id`.
    ///
    /// The schema is read fresh on every attempt. The returned snapshot is
    /// what later steps of the same tick see.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionFailure`] describing why the write did not happen.
    #[tracing::instrument(skip(self, entity), fields(entity = %entity.entity_ref(), %action))]
    pub async fn apply(
        &self,
        action: &Action,
        entity: &CrmEntity,
        automation_id: AutomationId,
    ) -> Result<CrmEntity, ExecutionFailure> {
        let origin = EventOrigin::Automation { automation_id };
        let target = entity.entity_ref();
        let mut current = entity.clone();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let schema = self
                .entities
                .schema(current.tenant_id, current.kind)
                .await
                .map_err(ExecutionFailure::Storage)?;
            let patch = action
                .to_patch(current.kind, &schema)
                .map_err(ExecutionFailure::SchemaDrift)?;

            match self
                .entities
                .update_entity(target, patch, Some(current.version), origin)
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(CrmFlowError::Conflict(conflict)) if attempts <= self.conflict_retries => {
                    tracing::debug!(
                        expected = conflict.expected,
                        actual = conflict.actual,
                        attempts,
                        "version conflict, re-reading entity"
                    );
                    current = self
                        .entities
                        .get_entity(target)
                        .await
                        .map_err(|err| classify(err, target))?;
                }
                Err(CrmFlowError::Conflict(_)) => {
                    return Err(ExecutionFailure::ConflictRetriesExhausted {
                        entity: target,
                        attempts,
                    });
                }
                Err(err) => return Err(classify(err, target)),
            }
        }
    }
}

fn classify(err: CrmFlowError, entity: EntityRef) -> ExecutionFailure {
    match err {
        CrmFlowError::NotFound(_) => ExecutionFailure::EntityMissing(entity),
        CrmFlowError::Validation(validation) => ExecutionFailure::SchemaDrift(validation),
        other => ExecutionFailure::Storage(other),
    }
}
