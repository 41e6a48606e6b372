//! Enrollment — one entity's progress through one automation's workflow.
//!
//! An enrollment is `active` while the engine owns it and ends in exactly
//! one of the terminal states. Terminal enrollments never change again.

use serde::{Deserialize, Serialize};

use crate::entity::EntityRef;
use crate::error::ValidationError;
use crate::id::{AutomationId, EnrollmentId, TenantId};
use crate::time::Timestamp;

/// Lifecycle state of an [`Enrollment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Failed,
    Unenrolled,
}

impl EnrollmentStatus {
    pub const ALL: [Self; 4] = [Self::Active, Self::Completed, Self::Failed, Self::Unenrolled];

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Active
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unenrolled => "unenrolled",
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EnrollmentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::Unrecognized(format!("unknown enrollment status {s:?}")))
    }
}

/// A branch step's routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub step_index: usize,
    /// Chosen branch label; `None` when nothing matched and there was no default.
    pub branch: Option<String>,
    pub target: Option<usize>,
    pub decided_at: Timestamp,
}

/// Bookkeeping carried alongside an enrollment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branch_history: Vec<BranchDecision>,
    /// Failed checks so far on the current waiting condition step.
    #[serde(default)]
    pub wait_checks: u32,
    #[serde(default)]
    pub steps_executed: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One (automation, entity) tracking episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub automation_id: AutomationId,
    pub tenant_id: TenantId,
    pub entity: EntityRef,
    pub current_step_index: usize,
    pub status: EnrollmentStatus,
    pub enrolled_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    /// When the next step is due. `None` means ready now.
    pub next_step_at: Option<Timestamp>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: EnrollmentMetadata,
}

impl Enrollment {
    /// A fresh active enrollment at step 0, due immediately.
    #[must_use]
    pub fn new(
        automation_id: AutomationId,
        tenant_id: TenantId,
        entity: EntityRef,
        now: Timestamp,
    ) -> Self {
        Self {
            id: EnrollmentId::new(),
            automation_id,
            tenant_id,
            entity,
            current_step_index: 0,
            status: EnrollmentStatus::Active,
            enrolled_at: now,
            completed_at: None,
            next_step_at: Some(now),
            last_error: None,
            metadata: EnrollmentMetadata::default(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }

    /// Active and scheduled at or before `now`.
    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.is_active() && self.next_step_at.is_none_or(|at| at <= now)
    }

    /// Move back to step 0 with fresh metadata, due at `now`.
    pub fn restart(&mut self, now: Timestamp) {
        self.current_step_index = 0;
        self.next_step_at = Some(now);
        self.last_error = None;
        self.metadata = EnrollmentMetadata::default();
    }

    pub fn complete(&mut self, now: Timestamp) {
        self.finish(EnrollmentStatus::Completed, now, None);
    }

    pub fn fail(&mut self, now: Timestamp, error: impl Into<String>) {
        self.finish(EnrollmentStatus::Failed, now, Some(error.into()));
    }

    pub fn unenroll(&mut self, now: Timestamp, reason: impl Into<String>) {
        self.finish(EnrollmentStatus::Unenrolled, now, Some(reason.into()));
    }

    fn finish(&mut self, status: EnrollmentStatus, now: Timestamp, error: Option<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.completed_at = Some(now);
        self.next_step_at = None;
        self.last_error = error;
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::entity::EntityKind;
    use crate::id::EntityId;
    use crate::time::now;

    fn enrollment() -> Enrollment {
        Enrollment::new(
            AutomationId::new(),
            TenantId::new(),
            EntityRef::new(EntityKind::Contact, EntityId::new()),
            now(),
        )
    }

    #[test]
    fn should_start_active_at_step_zero_and_due() {
        let e = enrollment();
        assert!(e.is_active());
        assert_eq!(e.current_step_index, 0);
        assert!(e.is_due(e.enrolled_at));
    }

    #[test]
    fn should_not_be_due_before_next_step_at() {
        let mut e = enrollment();
        let t = e.enrolled_at;
        e.next_step_at = Some(t + TimeDelta::hours(1));
        assert!(!e.is_due(t + TimeDelta::minutes(59)));
        assert!(e.is_due(t + TimeDelta::hours(1)));
    }

    #[test]
    fn should_be_due_when_next_step_at_is_null() {
        let mut e = enrollment();
        e.next_step_at = None;
        assert!(e.is_due(e.enrolled_at));
    }

    #[test]
    fn should_record_error_when_failed() {
        let mut e = enrollment();
        let t = now();
        e.fail(t, "boom");
        assert_eq!(e.status, EnrollmentStatus::Failed);
        assert_eq!(e.completed_at, Some(t));
        assert_eq!(e.last_error.as_deref(), Some("boom"));
        assert!(!e.is_due(t));
    }

    #[test]
    fn should_never_leave_a_terminal_state() {
        let mut e = enrollment();
        e.complete(now());
        e.unenroll(now(), "entity deleted");
        assert_eq!(e.status, EnrollmentStatus::Completed);
        assert!(e.last_error.is_none());
    }

    #[test]
    fn should_reset_progress_on_restart() {
        let mut e = enrollment();
        e.current_step_index = 3;
        e.metadata.wait_checks = 2;
        e.metadata.steps_executed = 5;
        let t = now();
        e.restart(t);
        assert_eq!(e.current_step_index, 0);
        assert_eq!(e.next_step_at, Some(t));
        assert_eq!(e.metadata, EnrollmentMetadata::default());
    }

    #[test]
    fn should_parse_status_from_str() {
        assert_eq!(
            "unenrolled".parse::<EnrollmentStatus>().unwrap(),
            EnrollmentStatus::Unenrolled
        );
        assert!("paused".parse::<EnrollmentStatus>().is_err());
    }

    #[test]
    fn should_keep_unknown_metadata_keys() {
        let json = serde_json::json!({"wait_checks": 1, "source": "import"});
        let metadata: EnrollmentMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(metadata.wait_checks, 1);
        assert_eq!(metadata.extra["source"], "import");
        let back = serde_json::to_value(&metadata).unwrap();
        assert_eq!(back["source"], "import");
    }
}
