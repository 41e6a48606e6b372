//! Automation service — use-cases for managing automations.
//!
//! Every write refreshes the [`AutomationCatalog`] so the engine sees the
//! new set of enabled automations on the next event.

use std::sync::Arc;

use crmflow_domain::automation::{Automation, WorkflowReport};
use crmflow_domain::error::{CrmFlowError, NotFoundError};
use crmflow_domain::id::{AutomationId, TenantId};
use crmflow_domain::log::AutomationLog;

use crate::automation_catalog::AutomationCatalog;
use crate::ports::{AutomationLogRepository, AutomationRepository, SharedClock};

/// Application service for automation CRUD operations.
pub struct AutomationService<R, L> {
    repo: R,
    logs: L,
    catalog: Arc<AutomationCatalog>,
    clock: SharedClock,
}

impl<R, L> AutomationService<R, L>
where
    R: AutomationRepository,
    L: AutomationLogRepository,
{
    /// Create a new service backed by the given repositories.
    pub fn new(repo: R, logs: L, catalog: Arc<AutomationCatalog>, clock: SharedClock) -> Self {
        Self {
            repo,
            logs,
            catalog,
            clock,
        }
    }

    /// Create a new automation after validating domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] if invariants fail or an enabled
    /// automation has workflow errors, or a storage error propagated from
    /// the repository.
    #[tracing::instrument(skip(self, automation), fields(automation_name = %automation.name))]
    pub async fn create_automation(
        &self,
        mut automation: Automation,
    ) -> Result<Automation, CrmFlowError> {
        check(&automation)?;
        let ts = self.clock.now();
        automation.created_at = ts;
        automation.updated_at = ts;
        automation.last_triggered = None;
        let created = self.repo.create(automation).await?;
        self.refresh_catalog().await;
        Ok(created)
    }

    /// Look up an automation by id, returning an error if not found.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when no automation with `id` exists,
    /// or a storage error from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn get_automation(&self, id: AutomationId) -> Result<Automation, CrmFlowError> {
        self.repo.get_by_id(id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Automation",
                id: id.to_string(),
            }
            .into()
        })
    }

    /// List a tenant's automations.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_automations(&self, tenant_id: TenantId) -> Result<Vec<Automation>, CrmFlowError> {
        self.repo.list_by_tenant(tenant_id).await
    }

    /// Replace an existing automation's definition.
    ///
    /// Creation time, tenant and last trigger time are kept from the stored
    /// automation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] if the automation does not exist,
    /// [`CrmFlowError::Validation`] if the new definition is invalid, or a
    /// storage error from the repository.
    #[tracing::instrument(skip(self, automation), fields(automation_id = %automation.id))]
    pub async fn update_automation(
        &self,
        mut automation: Automation,
    ) -> Result<Automation, CrmFlowError> {
        let stored = self.get_automation(automation.id).await?;
        check(&automation)?;
        automation.tenant_id = stored.tenant_id;
        automation.created_at = stored.created_at;
        automation.last_triggered = stored.last_triggered;
        automation.updated_at = self.clock.now();
        let updated = self.repo.update(automation).await?;
        self.refresh_catalog().await;
        Ok(updated)
    }

    /// Enable or disable an automation.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] when enabling an automation whose
    /// workflow has errors, [`CrmFlowError::NotFound`] when it does not
    /// exist, or a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn toggle_automation(
        &self,
        id: AutomationId,
        enabled: bool,
    ) -> Result<Automation, CrmFlowError> {
        let mut automation = self.get_automation(id).await?;
        automation.enabled = enabled;
        check(&automation)?;
        automation.updated_at = self.clock.now();
        let updated = self.repo.update(automation).await?;
        self.refresh_catalog().await;
        Ok(updated)
    }

    /// Delete an automation by id.
    ///
    /// Its active enrollments are unenrolled the next time they are processed.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the automation does not exist,
    /// or a storage error propagated from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn delete_automation(&self, id: AutomationId) -> Result<(), CrmFlowError> {
        self.get_automation(id).await?;
        self.repo.delete(id).await?;
        self.refresh_catalog().await;
        Ok(())
    }

    /// Statically check a (possibly unsaved) automation's workflow.
    #[must_use]
    pub fn validate_workflow(&self, automation: &Automation) -> WorkflowReport {
        automation.workflow_report()
    }

    /// Most recent audit records of an automation, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the automation does not exist,
    /// or a storage error.
    pub async fn automation_logs(
        &self,
        id: AutomationId,
        limit: usize,
    ) -> Result<Vec<AutomationLog>, CrmFlowError> {
        self.get_automation(id).await?;
        self.logs.list_by_automation(id, limit).await
    }

    /// Reload the catalog from storage. A failure keeps the previous set.
    pub async fn refresh_catalog(&self) {
        if let Err(err) = self.catalog.refresh(&self.repo).await {
            tracing::error!(error = %err, "failed to refresh automation catalog");
        }
    }
}

fn check(automation: &Automation) -> Result<(), CrmFlowError> {
    if automation.enabled {
        automation.ensure_runnable()
    } else {
        automation.validate()
    }
}
