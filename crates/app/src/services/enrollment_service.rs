//! Enrollment service — inspection and manual control of enrollments.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crmflow_domain::enrollment::{Enrollment, EnrollmentStatus};
use crmflow_domain::entity::EntityRef;
use crmflow_domain::error::{CrmFlowError, NotFoundError};
use crmflow_domain::id::{AutomationId, EnrollmentId};
use crmflow_domain::log::AutomationLog;
use crmflow_domain::time::Timestamp;

use crate::automation_engine::{AutomationEngine, PreviewEntry, ProcessMode, ProcessOutcome};
use crate::ports::{
    AutomationLogRepository, AutomationRepository, EnrollmentRepository, EntityStore,
    EventPublisher,
};

/// A failed enrollment, as shown in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEnrollment {
    pub id: EnrollmentId,
    pub entity: EntityRef,
    pub step_index: usize,
    pub error: Option<String>,
    pub failed_at: Option<Timestamp>,
}

/// Per-status counts of one automation's enrollments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentSummary {
    pub automation_id: AutomationId,
    pub total: usize,
    /// Status name → count; every status is present.
    pub counts: BTreeMap<&'static str, usize>,
    pub failed: Vec<FailedEnrollment>,
}

impl EnrollmentSummary {
    fn from_enrollments(automation_id: AutomationId, enrollments: &[Enrollment]) -> Self {
        let mut counts: BTreeMap<&'static str, usize> = EnrollmentStatus::ALL
            .into_iter()
            .map(|status| (status.as_str(), 0))
            .collect();
        for enrollment in enrollments {
            *counts.entry(enrollment.status.as_str()).or_default() += 1;
        }
        let failed = enrollments
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Failed)
            .map(|e| FailedEnrollment {
                id: e.id,
                entity: e.entity,
                step_index: e.current_step_index,
                error: e.last_error.clone(),
                failed_at: e.completed_at,
            })
            .collect();
        Self {
            automation_id,
            total: enrollments.len(),
            counts,
            failed,
        }
    }
}

/// Application service over the engine's enrollments.
pub struct EnrollmentService<A, N, L, S, P> {
    engine: Arc<AutomationEngine<A, N, L, S, P>>,
}

impl<A, N, L, S, P> EnrollmentService<A, N, L, S, P>
where
    A: AutomationRepository,
    N: EnrollmentRepository,
    L: AutomationLogRepository,
    S: EntityStore,
    P: EventPublisher,
{
    pub fn new(engine: Arc<AutomationEngine<A, N, L, S, P>>) -> Self {
        Self { engine }
    }

    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the enrollment does not exist,
    /// or a storage error.
    pub async fn get_enrollment(&self, id: EnrollmentId) -> Result<Enrollment, CrmFlowError> {
        self.engine
            .enrollment_repo()
            .get_by_id(id)
            .await?
            .ok_or_else(|| {
                NotFoundError {
                    entity: "Enrollment",
                    id: id.to_string(),
                }
                .into()
            })
    }

    /// All enrollments of an automation, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    pub async fn list_enrollments(
        &self,
        automation_id: AutomationId,
    ) -> Result<Vec<Enrollment>, CrmFlowError> {
        self.engine
            .enrollment_repo()
            .list_by_automation(automation_id)
            .await
    }

    /// Counts per status plus the failed enrollments with their errors.
    ///
    /// # Errors
    ///
    /// Returns a storage error propagated from the repository.
    #[tracing::instrument(skip(self))]
    pub async fn summary(&self, automation_id: AutomationId) -> Result<EnrollmentSummary, CrmFlowError> {
        let enrollments = self.list_enrollments(automation_id).await?;
        Ok(EnrollmentSummary::from_enrollments(
            automation_id,
            &enrollments,
        ))
    }

    /// The audit trail of one enrollment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::NotFound`] when the enrollment does not exist,
    /// or a storage error.
    pub async fn enrollment_logs(&self, id: EnrollmentId) -> Result<Vec<AutomationLog>, CrmFlowError> {
        self.get_enrollment(id).await?;
        self.engine.log_repo().list_by_enrollment(id).await
    }

    /// # Errors
    ///
    /// See [`AutomationEngine::enroll`].
    pub async fn enroll(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> Result<Enrollment, CrmFlowError> {
        self.engine.enroll(automation_id, entity).await
    }

    /// # Errors
    ///
    /// See [`AutomationEngine::unenroll`].
    pub async fn unenroll(&self, id: EnrollmentId) -> Result<Enrollment, CrmFlowError> {
        self.engine.unenroll(id, "unenrolled manually").await
    }

    /// Force one tick now, ignoring the due time.
    ///
    /// # Errors
    ///
    /// See [`AutomationEngine::process_enrollment`].
    pub async fn process(&self, id: EnrollmentId) -> Result<ProcessOutcome, CrmFlowError> {
        self.engine.process_enrollment(id, ProcessMode::Force).await
    }

    /// # Errors
    ///
    /// See [`AutomationEngine::preview_enrollment`].
    pub async fn preview(&self, automation_id: AutomationId) -> Result<Vec<PreviewEntry>, CrmFlowError> {
        self.engine.preview_enrollment(automation_id).await
    }
}
