//! Automation repository port — persistence for automations.

use std::future::Future;
use std::sync::Arc;

use crmflow_domain::automation::Automation;
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::{AutomationId, TenantId};
use crmflow_domain::time::Timestamp;

/// Repository for persisting and querying [`Automation`]s.
pub trait AutomationRepository {
    /// Create a new automation in storage.
    fn create(
        &self,
        automation: Automation,
    ) -> impl Future<Output = Result<Automation, CrmFlowError>> + Send;

    /// Get an automation by its unique identifier.
    fn get_by_id(
        &self,
        id: AutomationId,
    ) -> impl Future<Output = Result<Option<Automation>, CrmFlowError>> + Send;

    /// Get all automations of one tenant.
    fn list_by_tenant(
        &self,
        tenant_id: TenantId,
    ) -> impl Future<Output = Result<Vec<Automation>, CrmFlowError>> + Send;

    /// Get all enabled automations, across tenants.
    fn get_enabled(&self) -> impl Future<Output = Result<Vec<Automation>, CrmFlowError>> + Send;

    /// Update an existing automation.
    fn update(
        &self,
        automation: Automation,
    ) -> impl Future<Output = Result<Automation, CrmFlowError>> + Send;

    /// Record that the automation enrolled an entity at `at`.
    fn mark_triggered(
        &self,
        id: AutomationId,
        at: Timestamp,
    ) -> impl Future<Output = Result<(), CrmFlowError>> + Send;

    /// Delete an automation by its unique identifier.
    fn delete(&self, id: AutomationId) -> impl Future<Output = Result<(), CrmFlowError>> + Send;
}

impl<T: AutomationRepository + Send + Sync> AutomationRepository for Arc<T> {
    fn create(
        &self,
        automation: Automation,
    ) -> impl Future<Output = Result<Automation, CrmFlowError>> + Send {
        (**self).create(automation)
    }

    fn get_by_id(
        &self,
        id: AutomationId,
    ) -> impl Future<Output = Result<Option<Automation>, CrmFlowError>> + Send {
        (**self).get_by_id(id)
    }

    fn list_by_tenant(
        &self,
        tenant_id: TenantId,
    ) -> impl Future<Output = Result<Vec<Automation>, CrmFlowError>> + Send {
        (**self).list_by_tenant(tenant_id)
    }

    fn get_enabled(&self) -> impl Future<Output = Result<Vec<Automation>, CrmFlowError>> + Send {
        (**self).get_enabled()
    }

    fn update(
        &self,
        automation: Automation,
    ) -> impl Future<Output = Result<Automation, CrmFlowError>> + Send {
        (**self).update(automation)
    }

    fn mark_triggered(
        &self,
        id: AutomationId,
        at: Timestamp,
    ) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        (**self).mark_triggered(id, at)
    }

    fn delete(&self, id: AutomationId) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        (**self).delete(id)
    }
}
