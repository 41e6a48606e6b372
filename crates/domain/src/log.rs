//! Automation log — the audit trail of every automation run.

use serde::{Deserialize, Serialize};

use crate::automation::{Action, Automation, ConditionOutcome};
use crate::entity::EntityRef;
use crate::enrollment::Enrollment;
use crate::event::EventType;
use crate::id::{AutomationId, AutomationLogId, EnrollmentId};
use crate::time::Timestamp;

/// How a single run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutcome {
    /// A new enrollment was created (or restarted).
    Enrolled,
    /// The trigger matched but enrollment did not happen.
    Skipped,
    /// The tick stopped on a delay or a waiting condition.
    Suspended,
    /// The tick stopped at the step cap and will continue on the next sweep.
    Advanced,
    Completed,
    Failed,
    Unenrolled,
}

impl LogOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::Skipped => "skipped",
            Self::Suspended => "suspended",
            Self::Advanced => "advanced",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unenrolled => "unenrolled",
        }
    }
}

impl std::fmt::Display for LogOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: AutomationLogId,
    pub automation_id: AutomationId,
    pub enrollment_id: Option<EnrollmentId>,
    pub entity: EntityRef,
    pub trigger: EventType,
    pub step_index: Option<usize>,
    #[serde(default)]
    pub conditions: Vec<ConditionOutcome>,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub outcome: LogOutcome,
    pub error: Option<String>,
    pub created_at: Timestamp,
}

impl AutomationLog {
    #[must_use]
    pub fn new(
        automation: &Automation,
        entity: EntityRef,
        outcome: LogOutcome,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: AutomationLogId::new(),
            automation_id: automation.id,
            enrollment_id: None,
            entity,
            trigger: automation.trigger.event,
            step_index: None,
            conditions: Vec::new(),
            actions: Vec::new(),
            outcome,
            error: None,
            created_at,
        }
    }

    /// Attach the enrollment and the step it was on.
    #[must_use]
    pub fn for_enrollment(mut self, enrollment: &Enrollment) -> Self {
        self.enrollment_id = Some(enrollment.id);
        self.step_index = Some(enrollment.current_step_index);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step_index: usize) -> Self {
        self.step_index = Some(step_index);
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<ConditionOutcome>) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
