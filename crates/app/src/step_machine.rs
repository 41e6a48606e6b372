//! Step state machine — runs one tick of one enrollment.
//!
//! A tick starts at the enrollment's current step and keeps executing
//! steps until one suspends (delay, waiting condition), the enrollment
//! reaches a terminal state, or the per-tick step cap is hit. The caller
//! owns locking and persistence; the machine only mutates the enrollment
//! in memory and writes entity changes through the [`ActionExecutor`].
//!
//! A storage failure cuts the tick short with [`Interrupted`]. The
//! enrollment then still points at the step that failed, so saving it
//! keeps the steps that already committed from running again.

use std::sync::Arc;
use std::time::Duration;

use crmflow_domain::automation::{
    Action, Automation, AutomationStep, ConditionOutcome, DelayConfig, OnFalse, StepKind,
    evaluate_traced,
};
use crmflow_domain::enrollment::{BranchDecision, Enrollment};
use crmflow_domain::entity::CrmEntity;
use crmflow_domain::error::CrmFlowError;
use crmflow_domain::log::LogOutcome;
use crmflow_domain::time::Timestamp;

use crate::action_executor::{ActionExecutor, ExecutionFailure};
use crate::ports::{EntityStore, EventPublisher, SharedClock};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_STEPS_PER_TICK: usize = 50;

/// What one tick did, for the audit log.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub outcome: LogOutcome,
    /// Index of the last step that ran, if any.
    pub step_index: Option<usize>,
    pub conditions: Vec<ConditionOutcome>,
    pub actions: Vec<Action>,
    pub error: Option<String>,
    /// The entity as the last step left it.
    pub entity: CrmEntity,
}

/// A tick cut short by a storage failure.
///
/// `report` covers the steps that ran before the failure.
#[derive(Debug)]
pub struct Interrupted {
    pub report: TickReport,
    pub source: CrmFlowError,
}

enum Transition {
    /// Continue with the given step now, or complete on `None`.
    Advance(Option<usize>),
    /// Resume at `next` once `until` has passed; a trailing delay completes.
    Sleep {
        until: Timestamp,
        next: Option<usize>,
    },
    /// Stay on the current step and check again at `until`.
    Wait { until: Timestamp, checks: u32 },
    Unenroll(String),
    Fail(String),
}

pub struct StepMachine<S, P> {
    executor: Arc<ActionExecutor<S, P>>,
    clock: SharedClock,
    step_timeout: Duration,
    max_steps_per_tick: usize,
}

impl<S, P> StepMachine<S, P>
where
    S: EntityStore,
    P: EventPublisher,
{
    pub fn new(executor: Arc<ActionExecutor<S, P>>, clock: SharedClock) -> Self {
        Self {
            executor,
            clock,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            max_steps_per_tick: DEFAULT_MAX_STEPS_PER_TICK,
        }
    }

    #[must_use]
    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    #[must_use]
    pub fn with_max_steps_per_tick(mut self, max_steps: usize) -> Self {
        self.max_steps_per_tick = max_steps.max(1);
        self
    }

    /// Longest a single tick can take: every step running into its timeout.
    #[must_use]
    pub fn tick_budget(&self) -> Duration {
        let steps = u32::try_from(self.max_steps_per_tick).unwrap_or(u32::MAX);
        self.step_timeout.saturating_mul(steps)
    }

    /// Run one tick of `enrollment` against `entity`.
    ///
    /// Execution failures end the enrollment as `failed` and are reported
    /// in the returned [`TickReport`].
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] when storage fails mid-tick. The enrollment
    /// stays active at the failed step and reflects every step before it.
    #[tracing::instrument(
        skip_all,
        fields(automation_id = %automation.id, enrollment_id = %enrollment.id)
    )]
    pub async fn tick(
        &self,
        automation: &Automation,
        enrollment: &mut Enrollment,
        entity: CrmEntity,
    ) -> Result<TickReport, Box<Interrupted>> {
        let mut report = TickReport {
            outcome: LogOutcome::Advanced,
            step_index: None,
            conditions: Vec::new(),
            actions: Vec::new(),
            error: None,
            entity,
        };
        let mut executed = 0;

        loop {
            if executed >= self.max_steps_per_tick {
                tracing::debug!(executed, "step cap reached, continuing next sweep");
                enrollment.next_step_at = Some(self.clock.now());
                report.outcome = LogOutcome::Advanced;
                return Ok(report);
            }

            let index = enrollment.current_step_index;
            let transition = match automation.step(index) {
                None => Transition::Fail(ExecutionFailure::StepMissing(index).to_string()),
                Some(step) => {
                    report.step_index = Some(index);
                    let ran = {
                        let run = self.run_step(automation, &step, enrollment, &mut report);
                        tokio::time::timeout(self.step_timeout, run).await
                    };
                    match ran {
                        Ok(Ok(transition)) => transition,
                        Ok(Err(ExecutionFailure::Storage(source))) => {
                            tracing::warn!(step_index = index, error = %source, "tick interrupted");
                            return Err(Box::new(Interrupted { report, source }));
                        }
                        Ok(Err(failure)) => Transition::Fail(failure.to_string()),
                        Err(_) => Transition::Fail(
                            ExecutionFailure::StepTimeout {
                                step_index: index,
                                budget: self.step_timeout,
                            }
                            .to_string(),
                        ),
                    }
                }
            };
            executed += 1;
            enrollment.metadata.steps_executed += 1;

            let now = self.clock.now();
            match transition {
                Transition::Advance(Some(next)) => {
                    tracing::debug!(from = index, to = next, "advancing");
                    enrollment.current_step_index = next;
                    enrollment.next_step_at = Some(now);
                    enrollment.metadata.wait_checks = 0;
                }
                Transition::Advance(None) | Transition::Sleep { next: None, .. } => {
                    enrollment.complete(now);
                    report.outcome = LogOutcome::Completed;
                    return Ok(report);
                }
                Transition::Sleep {
                    until,
                    next: Some(next),
                } => {
                    enrollment.current_step_index = next;
                    enrollment.next_step_at = Some(until);
                    enrollment.metadata.wait_checks = 0;
                    report.outcome = LogOutcome::Suspended;
                    return Ok(report);
                }
                Transition::Wait { until, checks } => {
                    enrollment.next_step_at = Some(until);
                    enrollment.metadata.wait_checks = checks;
                    report.outcome = LogOutcome::Suspended;
                    return Ok(report);
                }
                Transition::Unenroll(reason) => {
                    enrollment.unenroll(now, reason.clone());
                    report.error = Some(reason);
                    report.outcome = LogOutcome::Unenrolled;
                    return Ok(report);
                }
                Transition::Fail(error) => {
                    tracing::warn!(step_index = index, %error, "enrollment failed");
                    enrollment.fail(now, error.clone());
                    report.error = Some(error);
                    report.outcome = LogOutcome::Failed;
                    return Ok(report);
                }
            }
        }
    }

    async fn run_step(
        &self,
        automation: &Automation,
        step: &AutomationStep,
        enrollment: &mut Enrollment,
        report: &mut TickReport,
    ) -> Result<Transition, ExecutionFailure> {
        match &step.kind {
            StepKind::Action { actions } => {
                for action in actions {
                    report.entity = self
                        .executor
                        .apply(action, &report.entity, automation.id)
                        .await?;
                    report.actions.push(action.clone());
                }
                Ok(Transition::Advance(step.next_step_index))
            }
            StepKind::Delay { delay } => Ok(Transition::Sleep {
                until: self.resume_at(step.step_index, *delay)?,
                next: step.next_step_index,
            }),
            StepKind::Condition {
                conditions,
                on_false,
            } => {
                let (passed, outcomes) = evaluate_traced(conditions, &report.entity);
                report.conditions.extend(outcomes);
                if passed {
                    return Ok(Transition::Advance(step.next_step_index));
                }
                let reason = format!("conditions of step {} not met", step.step_index);
                Ok(match on_false {
                    OnFalse::Unenroll => Transition::Unenroll(reason),
                    OnFalse::Fail => Transition::Fail(reason),
                    OnFalse::Wait {
                        recheck,
                        max_checks,
                    } => {
                        let checks = enrollment.metadata.wait_checks.saturating_add(1);
                        if max_checks.is_some_and(|max| checks >= max) {
                            Transition::Unenroll(format!("{reason} after {checks} checks"))
                        } else {
                            Transition::Wait {
                                until: self.resume_at(step.step_index, *recheck)?,
                                checks,
                            }
                        }
                    }
                })
            }
            StepKind::Branch {
                branches,
                default_branch,
            } => {
                let mut chosen = None;
                for branch in branches {
                    let (passed, outcomes) = evaluate_traced(&branch.conditions, &report.entity);
                    report.conditions.extend(outcomes);
                    if passed {
                        chosen = Some(branch.name.clone());
                        break;
                    }
                }
                let chosen = chosen.or_else(|| default_branch.clone());

                let target = match &chosen {
                    None => None,
                    Some(label) => match step.branch_step_indices.get(label) {
                        Some(target) => *target,
                        None => {
                            return Ok(Transition::Fail(format!(
                                "branch {label:?} of step {} has no target",
                                step.step_index
                            )));
                        }
                    },
                };
                tracing::debug!(branch = ?chosen, ?target, "branch decided");
                enrollment.metadata.branch_history.push(BranchDecision {
                    step_index: step.step_index,
                    branch: chosen,
                    target,
                    decided_at: self.clock.now(),
                });
                Ok(Transition::Advance(target))
            }
        }
    }

    fn resume_at(&self, step_index: usize, delay: DelayConfig) -> Result<Timestamp, ExecutionFailure> {
        self.clock
            .now()
            .checked_add_signed(delay.duration())
            .ok_or(ExecutionFailure::DelayOutOfRange { step_index, delay })
    }
}
