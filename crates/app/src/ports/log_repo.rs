//! Automation log repository port — the append-only audit trail.

use std::future::Future;
use std::sync::Arc;

use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::{AutomationId, EnrollmentId};
use crmflow_domain::log::AutomationLog;

/// Append-only storage for [`AutomationLog`] records.
pub trait AutomationLogRepository {
    fn append(
        &self,
        log: AutomationLog,
    ) -> impl Future<Output = Result<AutomationLog, CrmFlowError>> + Send;

    /// Most recent logs of an automation, newest first.
    fn list_by_automation(
        &self,
        automation_id: AutomationId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AutomationLog>, CrmFlowError>> + Send;

    /// Every log of one enrollment, oldest first.
    fn list_by_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> impl Future<Output = Result<Vec<AutomationLog>, CrmFlowError>> + Send;
}

impl<T: AutomationLogRepository + Send + Sync> AutomationLogRepository for Arc<T> {
    fn append(
        &self,
        log: AutomationLog,
    ) -> impl Future<Output = Result<AutomationLog, CrmFlowError>> + Send {
        (**self).append(log)
    }

    fn list_by_automation(
        &self,
        automation_id: AutomationId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AutomationLog>, CrmFlowError>> + Send {
        (**self).list_by_automation(automation_id, limit)
    }

    fn list_by_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> impl Future<Output = Result<Vec<AutomationLog>, CrmFlowError>> + Send {
        (**self).list_by_enrollment(enrollment_id)
    }
}
