//! Static validation of a step graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::step::MAX_DELAY_DAYS;
use super::{AutomationStep, StepKind};

/// How serious a [`WorkflowIssue`] is. Errors block activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Kind of problem found in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    NoSteps,
    MissingEntryStep,
    DuplicateStepIndex,
    DanglingNextStep,
    BranchWithoutTarget,
    DanglingBranchTarget,
    UnknownDefaultBranch,
    EmptyActionStep,
    EmptyBranches,
    ZeroDelay,
    DelayTooLong,
    UnreachableStep,
    TrailingDelay,
    EmptyConditionStep,
}

impl IssueCode {
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::TrailingDelay | Self::EmptyConditionStep => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowIssue {
    pub severity: Severity,
    pub code: IssueCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for WorkflowIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step_index {
            Some(index) => write!(f, "step {index}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of [`validate_workflow`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub valid: bool,
    pub issues: Vec<WorkflowIssue>,
}

impl WorkflowReport {
    pub fn errors(&self) -> impl Iterator<Item = &WorkflowIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &WorkflowIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }

    /// All error messages joined on one line.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Default)]
struct Collector {
    issues: Vec<WorkflowIssue>,
}

impl Collector {
    fn push(&mut self, code: IssueCode, step_index: Option<usize>, message: impl Into<String>) {
        self.issues.push(WorkflowIssue {
            severity: code.severity(),
            code,
            step_index,
            message: message.into(),
        });
    }

    fn finish(self) -> WorkflowReport {
        let valid = !self
            .issues
            .iter()
            .any(|issue| issue.severity == Severity::Error);
        WorkflowReport {
            valid,
            issues: self.issues,
        }
    }
}

/// Check a step graph for structural errors and suspicious shapes.
#[must_use]
pub fn validate_workflow(steps: &[AutomationStep]) -> WorkflowReport {
    let mut out = Collector::default();
    if steps.is_empty() {
        out.push(IssueCode::NoSteps, None, "workflow has no steps");
        return out.finish();
    }

    let mut by_index: BTreeMap<usize, &AutomationStep> = BTreeMap::new();
    for step in steps {
        if by_index.insert(step.step_index, step).is_some() {
            out.push(
                IssueCode::DuplicateStepIndex,
                Some(step.step_index),
                "step index is used more than once",
            );
        }
    }
    if !by_index.contains_key(&0) {
        out.push(
            IssueCode::MissingEntryStep,
            None,
            "workflow has no entry step 0",
        );
    }

    for step in by_index.values() {
        check_step(step, &by_index, &mut out);
    }

    if by_index.contains_key(&0) {
        let reachable = reachable_from_entry(&by_index);
        for index in by_index.keys().filter(|index| !reachable.contains(index)) {
            out.push(
                IssueCode::UnreachableStep,
                Some(*index),
                "step cannot be reached from step 0",
            );
        }
    }

    out.finish()
}

fn check_step(
    step: &AutomationStep,
    by_index: &BTreeMap<usize, &AutomationStep>,
    out: &mut Collector,
) {
    let at = Some(step.step_index);
    if let Some(next) = step.next_step_index
        && !by_index.contains_key(&next)
    {
        out.push(
            IssueCode::DanglingNextStep,
            at,
            format!("next step {next} does not exist"),
        );
    }

    match &step.kind {
        StepKind::Action { actions } => {
            if actions.is_empty() {
                out.push(IssueCode::EmptyActionStep, at, "action step has no actions");
            }
        }
        StepKind::Delay { delay } => {
            if delay.is_zero() {
                out.push(IssueCode::ZeroDelay, at, "delay must be greater than zero");
            }
            if delay.exceeds_max() {
                out.push(
                    IssueCode::DelayTooLong,
                    at,
                    format!("delay of {delay} exceeds {MAX_DELAY_DAYS} days"),
                );
            }
            if step.next_step_index.is_none() {
                out.push(
                    IssueCode::TrailingDelay,
                    at,
                    "delay is the last step and completes the enrollment immediately",
                );
            }
        }
        StepKind::Condition {
            conditions,
            on_false,
        } => {
            if conditions.is_empty() {
                out.push(
                    IssueCode::EmptyConditionStep,
                    at,
                    "condition step has no conditions and always passes",
                );
            }
            if let super::OnFalse::Wait { recheck, .. } = on_false {
                if recheck.is_zero() {
                    out.push(IssueCode::ZeroDelay, at, "recheck delay must be greater than zero");
                }
                if recheck.exceeds_max() {
                    out.push(
                        IssueCode::DelayTooLong,
                        at,
                        format!("recheck delay of {recheck} exceeds {MAX_DELAY_DAYS} days"),
                    );
                }
            }
        }
        StepKind::Branch {
            branches,
            default_branch,
        } => {
            if branches.is_empty() {
                out.push(IssueCode::EmptyBranches, at, "branch step has no branches");
            }
            for branch in branches {
                if !step.branch_step_indices.contains_key(&branch.name) {
                    out.push(
                        IssueCode::BranchWithoutTarget,
                        at,
                        format!("branch {:?} has no target step", branch.name),
                    );
                }
            }
            if let Some(default) = default_branch
                && !step.branch_step_indices.contains_key(default)
            {
                out.push(
                    IssueCode::UnknownDefaultBranch,
                    at,
                    format!("default branch {default:?} has no target step"),
                );
            }
            for (label, target) in &step.branch_step_indices {
                if let Some(target) = target
                    && !by_index.contains_key(target)
                {
                    out.push(
                        IssueCode::DanglingBranchTarget,
                        at,
                        format!("branch {label:?} targets missing step {target}"),
                    );
                }
            }
        }
    }
}

/// Successors the state machine can actually follow from `step`.
fn successors(step: &AutomationStep) -> Vec<usize> {
    match &step.kind {
        StepKind::Branch { .. } => step.branch_step_indices.values().flatten().copied().collect(),
        _ => step.next_step_index.into_iter().collect(),
    }
}

fn reachable_from_entry(by_index: &BTreeMap<usize, &AutomationStep>) -> BTreeSet<usize> {
    let mut seen = BTreeSet::from([0]);
    let mut queue = VecDeque::from([0]);
    while let Some(index) = queue.pop_front() {
        let Some(step) = by_index.get(&index) else {
            continue;
        };
        for next in successors(step) {
            if by_index.contains_key(&next) && seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}
