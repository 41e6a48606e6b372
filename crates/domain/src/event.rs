//! Event — an immutable record of something that happened to a CRM entity.
//!
//! Events are produced by the entity service whenever a contact or deal is
//! created, changed or deleted, whether by a user or by an automation. The
//! trigger matcher consumes them.

use serde::{Deserialize, Serialize};

use crate::entity::{CrmEntity, EntityKind, FieldChange};
use crate::id::{AutomationId, EventId, TenantId};
use crate::time::Timestamp;

/// The kind of change an [`EntityEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ContactCreated,
    ContactUpdated,
    ContactDeleted,
    DealCreated,
    DealUpdated,
    DealStageChanged,
    DealDeleted,
}

impl EventType {
    #[must_use]
    pub fn created(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Contact => Self::ContactCreated,
            EntityKind::Deal => Self::DealCreated,
        }
    }

    #[must_use]
    pub fn updated(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Contact => Self::ContactUpdated,
            EntityKind::Deal => Self::DealUpdated,
        }
    }

    #[must_use]
    pub fn deleted(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Contact => Self::ContactDeleted,
            EntityKind::Deal => Self::DealDeleted,
        }
    }

    /// The entity kind this event type is about.
    #[must_use]
    pub fn entity_kind(self) -> EntityKind {
        match self {
            Self::ContactCreated | Self::ContactUpdated | Self::ContactDeleted => {
                EntityKind::Contact
            }
            Self::DealCreated | Self::DealUpdated | Self::DealStageChanged | Self::DealDeleted => {
                EntityKind::Deal
            }
        }
    }

    #[must_use]
    pub fn is_deletion(self) -> bool {
        matches!(self, Self::ContactDeleted | Self::DealDeleted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContactCreated => "contact_created",
            Self::ContactUpdated => "contact_updated",
            Self::ContactDeleted => "contact_deleted",
            Self::DealCreated => "deal_created",
            Self::DealUpdated => "deal_updated",
            Self::DealStageChanged => "deal_stage_changed",
            Self::DealDeleted => "deal_deleted",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventOrigin {
    User,
    Automation { automation_id: AutomationId },
}

/// A change to one contact or deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    pub id: EventId,
    pub event_type: EventType,
    /// Snapshot of the entity after the change (before it, for deletions).
    pub entity: CrmEntity,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    pub origin: EventOrigin,
    pub timestamp: Timestamp,
}

impl EntityEvent {
    #[must_use]
    pub fn new(
        event_type: EventType,
        entity: CrmEntity,
        changes: Vec<FieldChange>,
        origin: EventOrigin,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            entity,
            changes,
            origin,
            timestamp,
        }
    }

    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.entity.tenant_id
    }

    /// Whether `field` is among the recorded changes.
    #[must_use]
    pub fn changed(&self, field: &str) -> bool {
        self.changes.iter().any(|change| change.field == field)
    }

    /// The recorded change to the pipeline stage, if any.
    #[must_use]
    pub fn stage_change(&self) -> Option<&FieldChange> {
        self.changes.iter().find(|change| change.field == "stage")
    }

    /// Whether the event was caused by the given automation.
    #[must_use]
    pub fn caused_by(&self, automation_id: AutomationId) -> bool {
        self.origin == EventOrigin::Automation { automation_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldValue;
    use crate::time::now;

    fn deal_event(changes: Vec<FieldChange>, origin: EventOrigin) -> EntityEvent {
        let deal = CrmEntity::builder()
            .kind(EntityKind::Deal)
            .field("stage", "won")
            .build()
            .unwrap();
        EntityEvent::new(EventType::DealStageChanged, deal, changes, origin, now())
    }

    #[test]
    fn should_pick_event_type_per_kind() {
        assert_eq!(
            EventType::created(EntityKind::Contact),
            EventType::ContactCreated
        );
        assert_eq!(EventType::updated(EntityKind::Deal), EventType::DealUpdated);
        assert_eq!(
            EventType::deleted(EntityKind::Deal).entity_kind(),
            EntityKind::Deal
        );
        assert!(EventType::ContactDeleted.is_deletion());
        assert!(!EventType::DealStageChanged.is_deletion());
    }

    #[test]
    fn should_serialize_event_type_as_snake_case() {
        let json = serde_json::to_string(&EventType::DealStageChanged).unwrap();
        assert_eq!(json, "\"deal_stage_changed\"");
        assert_eq!(EventType::DealStageChanged.to_string(), "deal_stage_changed");
    }

    #[test]
    fn should_find_stage_change_among_changes() {
        let event = deal_event(
            vec![FieldChange {
                field: "stage".into(),
                from: FieldValue::from("proposal"),
                to: FieldValue::from("won"),
            }],
            EventOrigin::User,
        );
        assert!(event.changed("stage"));
        assert!(!event.changed("value"));
        assert_eq!(
            event.stage_change().map(|c| &c.from),
            Some(&FieldValue::from("proposal"))
        );
    }

    #[test]
    fn should_know_which_automation_caused_it() {
        let automation_id = AutomationId::new();
        let event = deal_event(vec![], EventOrigin::Automation { automation_id });
        assert!(event.caused_by(automation_id));
        assert!(!event.caused_by(AutomationId::new()));
        assert!(!deal_event(vec![], EventOrigin::User).caused_by(automation_id));
    }

    #[test]
    fn should_roundtrip_origin_through_serde_json() {
        let origin = EventOrigin::Automation {
            automation_id: AutomationId::new(),
        };
        let json = serde_json::to_value(origin).unwrap();
        assert_eq!(json["type"], "automation");
        let parsed: EventOrigin = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, origin);
    }
}
