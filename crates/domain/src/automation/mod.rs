//! Automation — trigger → conditions → steps workflows.
//!
//! An automation watches entity events through its [`Trigger`], gates
//! enrollment on its [`Condition`]s and then drives each enrolled entity
//! through a graph of [`AutomationStep`]s. Older single-step automations
//! carry a flat list of [`Action`]s instead; they run as one synthetic
//! action step so both shapes share the same execution path.

mod action;
mod condition;
mod step;
mod trigger;
mod workflow;

pub use action::Action;
pub use condition::{Condition, ConditionOutcome, Logic, Operator, evaluate, evaluate_traced};
pub use step::{AutomationStep, Branch, DelayConfig, DelayUnit, MAX_DELAY_DAYS, OnFalse, StepKind};
pub use trigger::{Trigger, TriggerConfig};
pub use workflow::{IssueCode, Severity, WorkflowIssue, WorkflowReport, validate_workflow};

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{CrmFlowError, ValidationError};
use crate::event::{EntityEvent, EventType};
use crate::id::{AutomationId, TenantId};
use crate::time::{Timestamp, now};

/// What happens when a triggered entity already has an enrollment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReEnrollmentPolicy {
    /// An active enrollment blocks re-entry; a finished one does not.
    #[default]
    Skip,
    /// An active enrollment starts over at step 0.
    Restart,
    /// An entity goes through the workflow at most once.
    Once,
}

/// A tenant's rule that reacts to entity events by running a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: AutomationId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub steps: Vec<AutomationStep>,
    #[serde(default)]
    pub multi_step: bool,
    #[serde(default)]
    pub re_enrollment: ReEnrollmentPolicy,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub last_triggered: Option<Timestamp>,
}

impl Automation {
    /// Create a builder for constructing an [`Automation`].
    #[must_use]
    pub fn builder() -> AutomationBuilder {
        AutomationBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - a single-step automation has no `actions` ([`ValidationError::NoActions`])
    /// - a multi-step automation has no `steps` ([`ValidationError::NoSteps`])
    pub fn validate(&self) -> Result<(), CrmFlowError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.multi_step && self.steps.is_empty() {
            return Err(ValidationError::NoSteps.into());
        }
        if !self.multi_step && self.actions.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        Ok(())
    }

    /// The steps the state machine executes.
    ///
    /// Single-step automations yield one action step at index 0 with no
    /// successor.
    #[must_use]
    pub fn effective_steps(&self) -> Cow<'_, [AutomationStep]> {
        if self.multi_step {
            Cow::Borrowed(&self.steps)
        } else {
            Cow::Owned(vec![AutomationStep::action(0, self.actions.clone())])
        }
    }

    /// Look up a step of [`Self::effective_steps`] by index.
    #[must_use]
    pub fn step(&self, index: usize) -> Option<Cow<'_, AutomationStep>> {
        if self.multi_step {
            self.steps
                .iter()
                .find(|step| step.step_index == index)
                .map(Cow::Borrowed)
        } else {
            (index == 0).then(|| Cow::Owned(AutomationStep::action(0, self.actions.clone())))
        }
    }

    #[must_use]
    pub fn workflow_report(&self) -> WorkflowReport {
        validate_workflow(&self.effective_steps())
    }

    /// Check that the automation may be enabled.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] when [`Self::validate`] fails or
    /// the workflow has errors ([`ValidationError::InvalidWorkflow`]).
    pub fn ensure_runnable(&self) -> Result<(), CrmFlowError> {
        self.validate()?;
        let report = self.workflow_report();
        if !report.valid {
            return Err(ValidationError::InvalidWorkflow(report.error_summary()).into());
        }
        Ok(())
    }

    /// Whether `event` should be considered for enrollment in this automation.
    ///
    /// Requires the automation to be enabled and in the event's tenant, and
    /// ignores events this automation caused itself.
    #[must_use]
    pub fn is_triggered_by(&self, event: &EntityEvent) -> bool {
        self.enabled
            && self.tenant_id == event.tenant_id()
            && !event.caused_by(self.id)
            && self.trigger.matches_event(event)
    }
}

/// Step-by-step builder for [`Automation`].
#[derive(Debug, Default)]
pub struct AutomationBuilder {
    id: Option<AutomationId>,
    tenant_id: Option<TenantId>,
    name: Option<String>,
    description: Option<String>,
    enabled: Option<bool>,
    trigger: Option<Trigger>,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
    steps: Vec<AutomationStep>,
    re_enrollment: ReEnrollmentPolicy,
    last_triggered: Option<Timestamp>,
}

impl AutomationBuilder {
    #[must_use]
    pub fn id(mut self, id: AutomationId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Add a workflow step. Any step makes the automation multi-step.
    #[must_use]
    pub fn step(mut self, step: AutomationStep) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn re_enrollment(mut self, policy: ReEnrollmentPolicy) -> Self {
        self.re_enrollment = policy;
        self
    }

    #[must_use]
    pub fn last_triggered(mut self, ts: Timestamp) -> Self {
        self.last_triggered = Some(ts);
        self
    }

    /// Consume the builder, validate, and return an [`Automation`].
    ///
    /// Defaults to enabled, triggered by `contact_created`.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] if required fields are missing or empty.
    pub fn build(self) -> Result<Automation, CrmFlowError> {
        let ts = now();
        let automation = Automation {
            id: self.id.unwrap_or_default(),
            tenant_id: self.tenant_id.unwrap_or_default(),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            enabled: self.enabled.unwrap_or(true),
            trigger: self
                .trigger
                .unwrap_or_else(|| Trigger::on(EventType::ContactCreated)),
            conditions: self.conditions,
            actions: self.actions,
            multi_step: !self.steps.is_empty(),
            steps: self.steps,
            re_enrollment: self.re_enrollment,
            created_at: ts,
            updated_at: ts,
            last_triggered: self.last_triggered,
        };
        automation.validate()?;
        Ok(automation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CrmEntity, EntityKind};
    use crate::event::EventOrigin;

    fn tag_action() -> Action {
        Action::AddTag {
            tag: "new-lead".to_string(),
        }
    }

    fn valid_automation() -> Automation {
        Automation::builder()
            .name("Tag new leads")
            .trigger(Trigger::on(EventType::ContactCreated))
            .action(tag_action())
            .build()
            .unwrap()
    }

    fn contact_created(tenant_id: TenantId, origin: EventOrigin) -> EntityEvent {
        let contact = CrmEntity::builder()
            .tenant_id(tenant_id)
            .kind(EntityKind::Contact)
            .build()
            .unwrap();
        EntityEvent::new(EventType::ContactCreated, contact, vec![], origin, now())
    }

    #[test]
    fn should_build_valid_automation_when_required_fields_provided() {
        let auto = valid_automation();
        assert_eq!(auto.name, "Tag new leads");
        assert!(auto.enabled);
        assert!(!auto.multi_step);
        assert!(auto.conditions.is_empty());
        assert_eq!(auto.re_enrollment, ReEnrollmentPolicy::Skip);
        assert!(auto.last_triggered.is_none());
    }

    #[test]
    fn should_return_validation_error_when_name_is_empty() {
        let result = Automation::builder().action(tag_action()).build();
        assert!(matches!(
            result,
            Err(CrmFlowError::Validation(ValidationError::EmptyName))
        ));
    }

    #[test]
    fn should_return_validation_error_when_actions_is_empty() {
        let result = Automation::builder().name("No actions").build();
        assert!(matches!(
            result,
            Err(CrmFlowError::Validation(ValidationError::NoActions))
        ));
    }

    #[test]
    fn should_return_validation_error_when_multi_step_has_no_steps() {
        let mut auto = valid_automation();
        auto.multi_step = true;
        assert!(matches!(
            auto.validate(),
            Err(CrmFlowError::Validation(ValidationError::NoSteps))
        ));
    }

    #[test]
    fn should_run_legacy_actions_as_single_step() {
        let auto = valid_automation();
        let steps = auto.effective_steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_index, 0);
        assert_eq!(steps[0].next_step_index, None);
        assert!(matches!(&steps[0].kind, StepKind::Action { actions } if actions.len() == 1));
        assert!(auto.workflow_report().valid);
    }

    #[test]
    fn should_become_multi_step_when_steps_added() {
        let auto = Automation::builder()
            .name("Nurture")
            .step(AutomationStep::action(0, vec![tag_action()]).then(1))
            .step(AutomationStep::delay(1, DelayConfig::new(1, DelayUnit::Days)).then(2))
            .step(AutomationStep::action(2, vec![tag_action()]))
            .build()
            .unwrap();
        assert!(auto.multi_step);
        assert_eq!(auto.effective_steps().len(), 3);
        assert!(auto.step(1).is_some());
        assert!(auto.step(5).is_none());
        assert!(matches!(auto.step(2), Some(Cow::Borrowed(_))));
    }

    #[test]
    fn should_only_resolve_index_zero_when_single_step() {
        let auto = Automation::builder()
            .name("Tag")
            .action(tag_action())
            .build()
            .unwrap();
        let step = auto.step(0).unwrap();
        assert_eq!(step.next_step_index, None);
        assert!(matches!(&step.kind, StepKind::Action { actions } if actions.len() == 1));
        assert!(auto.step(1).is_none());
    }

    #[test]
    fn should_refuse_to_run_invalid_workflow() {
        let auto = Automation::builder()
            .name("Broken")
            .step(AutomationStep::action(0, vec![tag_action()]).then(3))
            .build()
            .unwrap();
        assert!(matches!(
            auto.ensure_runnable(),
            Err(CrmFlowError::Validation(ValidationError::InvalidWorkflow(msg))) if msg.contains("next step 3")
        ));
    }

    #[test]
    fn should_be_triggered_by_matching_event_in_same_tenant() {
        let auto = valid_automation();
        assert!(auto.is_triggered_by(&contact_created(auto.tenant_id, EventOrigin::User)));
        assert!(!auto.is_triggered_by(&contact_created(TenantId::new(), EventOrigin::User)));
    }

    #[test]
    fn should_ignore_events_caused_by_itself() {
        let auto = valid_automation();
        let own = EventOrigin::Automation {
            automation_id: auto.id,
        };
        let other = EventOrigin::Automation {
            automation_id: AutomationId::new(),
        };
        assert!(!auto.is_triggered_by(&contact_created(auto.tenant_id, own)));
        assert!(auto.is_triggered_by(&contact_created(auto.tenant_id, other)));
    }

    #[test]
    fn should_not_be_triggered_when_disabled() {
        let mut auto = valid_automation();
        auto.enabled = false;
        assert!(!auto.is_triggered_by(&contact_created(auto.tenant_id, EventOrigin::User)));
    }

    #[test]
    fn should_roundtrip_automation_through_serde_json() {
        let auto = valid_automation();
        let json = serde_json::to_string(&auto).unwrap();
        let parsed: Automation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, auto);
    }
}
