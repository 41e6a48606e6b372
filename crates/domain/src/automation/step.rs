//! Workflow steps and their typed configurations.

use std::collections::BTreeMap;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::{Action, Condition};

/// One node of a multi-step workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationStep {
    pub step_index: usize,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Default successor. `None` ends the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_index: Option<usize>,
    /// Branch label → successor. A `null` target ends the workflow.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branch_step_indices: BTreeMap<String, Option<usize>>,
}

/// Step type with its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Action {
        actions: Vec<Action>,
    },
    Delay {
        delay: DelayConfig,
    },
    Condition {
        #[serde(default)]
        conditions: Vec<Condition>,
        #[serde(default)]
        on_false: OnFalse,
    },
    Branch {
        branches: Vec<Branch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_branch: Option<String>,
    },
}

impl StepKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action { .. } => "action",
            Self::Delay { .. } => "delay",
            Self::Condition { .. } => "condition",
            Self::Branch { .. } => "branch",
        }
    }
}

/// Unit of a [`DelayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

/// Longest delay a workflow may configure, in days.
pub const MAX_DELAY_DAYS: i64 = 3650;

/// A relative wait such as "2 days".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub value: u32,
    pub unit: DelayUnit,
}

impl DelayConfig {
    #[must_use]
    pub fn new(value: u32, unit: DelayUnit) -> Self {
        Self { value, unit }
    }

    #[must_use]
    pub fn duration(self) -> TimeDelta {
        let value = i64::from(self.value);
        match self.unit {
            DelayUnit::Minutes => TimeDelta::minutes(value),
            DelayUnit::Hours => TimeDelta::hours(value),
            DelayUnit::Days => TimeDelta::days(value),
            DelayUnit::Weeks => TimeDelta::weeks(value),
        }
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.value == 0
    }

    /// Whether the delay is longer than [`MAX_DELAY_DAYS`].
    #[must_use]
    pub fn exceeds_max(self) -> bool {
        self.duration() > TimeDelta::days(MAX_DELAY_DAYS)
    }
}

impl std::fmt::Display for DelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.unit {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
            DelayUnit::Weeks => "weeks",
        };
        write!(f, "{} {unit}", self.value)
    }
}

/// What a condition step does when its conditions do not hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnFalse {
    #[default]
    Unenroll,
    Fail,
    /// Stay on the step and check again after `recheck`.
    Wait {
        recheck: DelayConfig,
        /// Give up (unenroll) after this many failed checks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_checks: Option<u32>,
    },
}

/// A named path out of a branch step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl AutomationStep {
    fn new(step_index: usize, kind: StepKind) -> Self {
        Self {
            step_index,
            kind,
            next_step_index: None,
            branch_step_indices: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn action(step_index: usize, actions: Vec<Action>) -> Self {
        Self::new(step_index, StepKind::Action { actions })
    }

    #[must_use]
    pub fn delay(step_index: usize, delay: DelayConfig) -> Self {
        Self::new(step_index, StepKind::Delay { delay })
    }

    #[must_use]
    pub fn condition(step_index: usize, conditions: Vec<Condition>, on_false: OnFalse) -> Self {
        Self::new(
            step_index,
            StepKind::Condition {
                conditions,
                on_false,
            },
        )
    }

    #[must_use]
    pub fn branch(step_index: usize, branches: Vec<Branch>, default_branch: Option<String>) -> Self {
        Self::new(
            step_index,
            StepKind::Branch {
                branches,
                default_branch,
            },
        )
    }

    /// Set the default successor.
    #[must_use]
    pub fn then(mut self, next: usize) -> Self {
        self.next_step_index = Some(next);
        self
    }

    /// Map a branch label to a successor (`None` = end of workflow).
    #[must_use]
    pub fn route(mut self, label: impl Into<String>, target: Option<usize>) -> Self {
        self.branch_step_indices.insert(label.into(), target);
        self
    }
}
