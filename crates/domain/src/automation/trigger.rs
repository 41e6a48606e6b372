//! Trigger — the event pattern that activates an automation.

use serde::{Deserialize, Serialize};

use crate::entity::{FieldValue, custom_field_key};
use crate::event::{EntityEvent, EventType};

/// Describes which entity events should start an enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type")]
    pub event: EventType,
    #[serde(default)]
    pub config: TriggerConfig,
}

/// Optional narrowing of a [`Trigger`]. Every field left empty matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Only fire if one of these fields changed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    /// Only fire on a stage change leaving this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_stage: Option<String>,
    /// Only fire on a stage change entering this stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_stage: Option<String>,
}

impl Trigger {
    #[must_use]
    pub fn on(event: EventType) -> Self {
        Self {
            event,
            config: TriggerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: TriggerConfig) -> Self {
        self.config = config;
        self
    }

    /// Check whether this trigger matches a given event.
    ///
    /// Deletion events never match; they end enrollments instead of
    /// starting them.
    #[must_use]
    pub fn matches_event(&self, event: &EntityEvent) -> bool {
        if event.event_type.is_deletion() || event.event_type != self.event {
            return false;
        }

        if !self.config.fields.is_empty()
            && !self
                .config
                .fields
                .iter()
                .any(|field| field_changed(event, field))
        {
            return false;
        }

        if self.config.from_stage.is_none() && self.config.to_stage.is_none() {
            return true;
        }
        let Some(change) = event.stage_change() else {
            return false;
        };
        stage_matches(self.config.from_stage.as_deref(), &change.from)
            && stage_matches(self.config.to_stage.as_deref(), &change.to)
    }
}

fn field_changed(event: &EntityEvent, field: &str) -> bool {
    match custom_field_key(field) {
        Some(key) => event
            .changes
            .iter()
            .any(|change| custom_field_key(&change.field) == Some(key)),
        None => event.changed(field),
    }
}

fn stage_matches(expected: Option<&str>, actual: &FieldValue) -> bool {
    expected.is_none_or(|stage| actual.as_text() == Some(stage))
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.event)?;
        if let Some(from) = &self.config.from_stage {
            write!(f, " from {from}")?;
        }
        if let Some(to) = &self.config.to_stage {
            write!(f, " to {to}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CrmEntity, EntityKind, FieldChange};
    use crate::event::EventOrigin;
    use crate::time::now;

    fn event(event_type: EventType, changes: Vec<FieldChange>) -> EntityEvent {
        let entity = CrmEntity::builder()
            .kind(event_type.entity_kind())
            .build()
            .unwrap();
        EntityEvent::new(event_type, entity, changes, EventOrigin::User, now())
    }

    fn change(field: &str, from: &str, to: &str) -> FieldChange {
        FieldChange {
            field: field.to_string(),
            from: FieldValue::from(from),
            to: FieldValue::from(to),
        }
    }

    #[test]
    fn should_match_when_event_type_matches_without_config() {
        let trigger = Trigger::on(EventType::ContactCreated);
        assert!(trigger.matches_event(&event(EventType::ContactCreated, vec![])));
    }

    #[test]
    fn should_not_match_when_event_type_differs() {
        let trigger = Trigger::on(EventType::ContactCreated);
        assert!(!trigger.matches_event(&event(EventType::ContactUpdated, vec![])));
    }

    #[test]
    fn should_never_match_deletion_events() {
        let trigger = Trigger::on(EventType::DealDeleted);
        assert!(!trigger.matches_event(&event(EventType::DealDeleted, vec![])));
    }

    #[test]
    fn should_only_match_when_watched_field_changed() {
        let trigger = Trigger::on(EventType::ContactUpdated).with_config(TriggerConfig {
            fields: vec!["email".into(), "custom.industry".into()],
            ..TriggerConfig::default()
        });
        assert!(trigger.matches_event(&event(
            EventType::ContactUpdated,
            vec![change("email", "a@x.io", "b@x.io")]
        )));
        assert!(trigger.matches_event(&event(
            EventType::ContactUpdated,
            vec![change("customFields.industry", "", "saas")]
        )));
        assert!(!trigger.matches_event(&event(
            EventType::ContactUpdated,
            vec![change("phone", "1", "2")]
        )));
    }

    #[test]
    fn should_match_stage_transition_when_from_and_to_match() {
        let trigger = Trigger::on(EventType::DealStageChanged).with_config(TriggerConfig {
            from_stage: Some("proposal".into()),
            to_stage: Some("won".into()),
            ..TriggerConfig::default()
        });
        assert!(trigger.matches_event(&event(
            EventType::DealStageChanged,
            vec![change("stage", "proposal", "won")]
        )));
        assert!(!trigger.matches_event(&event(
            EventType::DealStageChanged,
            vec![change("stage", "new", "won")]
        )));
        assert!(!trigger.matches_event(&event(EventType::DealStageChanged, vec![])));
    }

    #[test]
    fn should_match_only_to_stage_when_from_unset() {
        let trigger = Trigger::on(EventType::DealStageChanged).with_config(TriggerConfig {
            to_stage: Some("won".into()),
            ..TriggerConfig::default()
        });
        assert!(trigger.matches_event(&event(
            EventType::DealStageChanged,
            vec![change("stage", "anything", "won")]
        )));
    }

    #[test]
    fn should_deserialize_trigger_without_config() {
        let trigger: Trigger =
            serde_json::from_value(serde_json::json!({"type": "deal_created"})).unwrap();
        assert_eq!(trigger, Trigger::on(EventType::DealCreated));
        assert_eq!(trigger.event.entity_kind(), EntityKind::Deal);
    }

    #[test]
    fn should_display_trigger_with_stages() {
        let trigger = Trigger::on(EventType::DealStageChanged).with_config(TriggerConfig {
            to_stage: Some("won".into()),
            ..TriggerConfig::default()
        });
        assert_eq!(trigger.to_string(), "deal_stage_changed to won");
    }
}
