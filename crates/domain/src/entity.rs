//! CRM entities — the contacts and deals automations act on.
//!
//! A [`CrmEntity`] is a snapshot of one record: its standard fields, the
//! tenant-defined custom fields, its tags, and an optimistic-concurrency
//! `version` that every write increments.

mod field_value;
mod kind;
mod patch;
mod resolver;
mod schema;

pub use field_value::FieldValue;
pub use kind::EntityKind;
pub use patch::{EntityPatch, FieldChange, TAGS_FIELD};
pub use resolver::{CUSTOM_FIELD_PREFIX, custom_field_key, resolve};
pub use schema::EntitySchema;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CrmFlowError, ValidationError};
use crate::id::{EntityId, TenantId};
use crate::time::{Timestamp, now};

/// Names a single entity without carrying its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "entity_type")]
    pub kind: EntityKind,
    #[serde(rename = "entity_id")]
    pub id: EntityId,
}

impl EntityRef {
    #[must_use]
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A contact or deal snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmEntity {
    pub id: EntityId,
    pub tenant_id: TenantId,
    #[serde(rename = "entity_type")]
    pub kind: EntityKind,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl CrmEntity {
    /// Create a builder for constructing a [`CrmEntity`].
    #[must_use]
    pub fn builder() -> CrmEntityBuilder {
        CrmEntityBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] when a standard field is not
    /// defined for the entity's kind.
    pub fn validate(&self) -> Result<(), CrmFlowError> {
        if let Some(field) = self
            .fields
            .keys()
            .find(|field| !self.kind.has_standard_field(field))
        {
            return Err(ValidationError::UnknownField {
                kind: self.kind,
                field: field.clone(),
            }
            .into());
        }
        Ok(())
    }

    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id)
    }

    /// Case-insensitive tag membership.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Current pipeline stage, for deals that have one.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.fields.get("stage").and_then(FieldValue::as_text)
    }
}

/// Step-by-step builder for [`CrmEntity`].
#[derive(Debug, Default)]
pub struct CrmEntityBuilder {
    id: Option<EntityId>,
    tenant_id: Option<TenantId>,
    kind: Option<EntityKind>,
    fields: BTreeMap<String, FieldValue>,
    custom_fields: BTreeMap<String, FieldValue>,
    tags: BTreeSet<String>,
}

impl CrmEntityBuilder {
    #[must_use]
    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn tenant_id(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn custom_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Consume the builder, validate, and return a [`CrmEntity`].
    ///
    /// Defaults to a contact in a fresh tenant at version 0.
    ///
    /// # Errors
    ///
    /// Returns [`CrmFlowError::Validation`] if a standard field is unknown.
    pub fn build(self) -> Result<CrmEntity, CrmFlowError> {
        let ts = now();
        let entity = CrmEntity {
            id: self.id.unwrap_or_default(),
            tenant_id: self.tenant_id.unwrap_or_default(),
            kind: self.kind.unwrap_or(EntityKind::Contact),
            fields: self.fields,
            custom_fields: self.custom_fields,
            tags: self.tags,
            version: 0,
            created_at: ts,
            updated_at: ts,
        };
        entity.validate()?;
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_contact_by_default() {
        let entity = CrmEntity::builder()
            .field("first_name", "Ada")
            .build()
            .unwrap();
        assert_eq!(entity.kind, EntityKind::Contact);
        assert_eq!(entity.version, 0);
        assert_eq!(entity.created_at, entity.updated_at);
    }

    #[test]
    fn should_reject_field_not_defined_for_kind() {
        let result = CrmEntity::builder()
            .kind(EntityKind::Contact)
            .field("stage", "won")
            .build();
        assert!(matches!(
            result,
            Err(CrmFlowError::Validation(ValidationError::UnknownField { .. }))
        ));
    }

    #[test]
    fn should_expose_deal_stage() {
        let deal = CrmEntity::builder()
            .kind(EntityKind::Deal)
            .field("stage", "proposal")
            .build()
            .unwrap();
        assert_eq!(deal.stage(), Some("proposal"));
    }

    #[test]
    fn should_match_tags_case_insensitively() {
        let entity = CrmEntity::builder().tag("VIP").build().unwrap();
        assert!(entity.has_tag("vip"));
        assert!(!entity.has_tag("lead"));
    }

    #[test]
    fn should_serialize_entity_ref_with_wire_names() {
        let id = EntityId::new();
        let r = EntityRef::new(EntityKind::Deal, id);
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["entity_type"], "deal");
        assert_eq!(json["entity_id"], id.to_string());
    }

    #[test]
    fn should_roundtrip_through_serde_json() {
        let entity = CrmEntity::builder()
            .field("email", "ada@example.com")
            .custom_field("region", "emea")
            .tag("new-lead")
            .build()
            .unwrap();
        let json = serde_json::to_string(&entity).unwrap();
        let parsed: CrmEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entity);
    }
}
