//! Enrollment repository port — persistence, scheduling and locking for enrollments.

use std::future::Future;
use std::sync::Arc;

use crmflow_domain::enrollment::Enrollment;
use crmflow_domain::entity::EntityRef;
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::id::{AutomationId, EnrollmentId, LeaseToken};
use crmflow_domain::time::Timestamp;

/// Repository for [`Enrollment`]s.
///
/// Implementations must guarantee at most one `active` enrollment per
/// (automation, entity) and make [`Self::try_lock`], [`Self::save`] and
/// [`Self::save_leased`] atomic with respect to concurrent callers.
///
/// A lease belongs to the [`LeaseToken`] that took it. Only that token can
/// release it or write through it, so a holder whose lease expired and was
/// taken over cannot clobber the new holder's work.
pub trait EnrollmentRepository {
    /// Insert a new active enrollment.
    ///
    /// Returns `false` (and stores nothing) when the entity already has an
    /// active enrollment in the same automation.
    fn insert_active(
        &self,
        enrollment: Enrollment,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send;

    fn get_by_id(
        &self,
        id: EnrollmentId,
    ) -> impl Future<Output = Result<Option<Enrollment>, CrmFlowError>> + Send;

    /// Most recently created enrollment of `entity` in `automation_id`, whatever its status.
    fn find_latest(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<Enrollment>, CrmFlowError>> + Send;

    /// Active enrollments of `entity` across all automations.
    fn find_active_for_entity(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send;

    /// All enrollments of an automation, newest first.
    fn list_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send;

    /// Up to `limit` active enrollments whose `next_step_at` is null or `<= now`,
    /// oldest due first.
    fn load_due(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send;

    /// Take the exclusive processing lease on `id` for `token` until `lease_until`.
    ///
    /// Returns `false` when someone else holds an unexpired lease.
    fn try_lock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
        now: Timestamp,
        lease_until: Timestamp,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send;

    /// Release the lease on `id` if `token` still holds it.
    fn unlock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
    ) -> impl Future<Output = Result<(), CrmFlowError>> + Send;

    /// Persist `enrollment`, but only if the stored row is still `active`.
    ///
    /// Used for terminal transitions made outside a tick. Returns `false`
    /// when the stored row is missing or already terminal.
    fn save(
        &self,
        enrollment: &Enrollment,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send;

    /// Persist `enrollment` if the stored row is still `active` and `token`
    /// still holds its lease.
    fn save_leased(
        &self,
        enrollment: &Enrollment,
        token: LeaseToken,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send;
}

impl<T: EnrollmentRepository + Send + Sync> EnrollmentRepository for Arc<T> {
    fn insert_active(
        &self,
        enrollment: Enrollment,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        (**self).insert_active(enrollment)
    }

    fn get_by_id(
        &self,
        id: EnrollmentId,
    ) -> impl Future<Output = Result<Option<Enrollment>, CrmFlowError>> + Send {
        (**self).get_by_id(id)
    }

    fn find_latest(
        &self,
        automation_id: AutomationId,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Option<Enrollment>, CrmFlowError>> + Send {
        (**self).find_latest(automation_id, entity)
    }

    fn find_active_for_entity(
        &self,
        entity: EntityRef,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send {
        (**self).find_active_for_entity(entity)
    }

    fn list_by_automation(
        &self,
        automation_id: AutomationId,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send {
        (**self).list_by_automation(automation_id)
    }

    fn load_due(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Enrollment>, CrmFlowError>> + Send {
        (**self).load_due(now, limit)
    }

    fn try_lock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
        now: Timestamp,
        lease_until: Timestamp,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        (**self).try_lock(id, token, now, lease_until)
    }

    fn unlock(
        &self,
        id: EnrollmentId,
        token: LeaseToken,
    ) -> impl Future<Output = Result<(), CrmFlowError>> + Send {
        (**self).unlock(id, token)
    }

    fn save(
        &self,
        enrollment: &Enrollment,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        (**self).save(enrollment)
    }

    fn save_leased(
        &self,
        enrollment: &Enrollment,
        token: LeaseToken,
    ) -> impl Future<Output = Result<bool, CrmFlowError>> + Send {
        (**self).save_leased(enrollment, token)
    }
}
