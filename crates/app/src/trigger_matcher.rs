//! Trigger matching — which automations an event should be considered for.

use crmflow_domain::automation::Automation;
use crmflow_domain::event::EntityEvent;

/// Automations of `automations` whose trigger admits `event`.
///
/// Deletions never match; they end enrollments instead of starting them.
#[must_use]
pub fn match_event<'a>(event: &EntityEvent, automations: &'a [Automation]) -> Vec<&'a Automation> {
    if event.event_type.is_deletion() {
        return Vec::new();
    }
    automations
        .iter()
        .filter(|automation| automation.is_triggered_by(event))
        .collect()
}
