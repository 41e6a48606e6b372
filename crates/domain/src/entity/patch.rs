//! Entity patches — the unit of atomic mutation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::resolver::CUSTOM_FIELD_PREFIX;
use super::{CrmEntity, EntityKind, EntitySchema, FieldValue};
use crate::error::ValidationError;
use crate::time::Timestamp;

/// Field name used in [`FieldChange`] records for tag changes.
pub const TAGS_FIELD: &str = "tags";

/// One observed change produced by applying a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: FieldValue,
    pub to: FieldValue,
}

/// A set of field writes and tag additions applied in one store write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPatch {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub add_tags: BTreeSet<String>,
}

impl EntityPatch {
    #[must_use]
    pub fn set_field(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn set_custom_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.custom_fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn add_tag(mut self, tag: impl Into<String>) -> Self {
        self.add_tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.custom_fields.is_empty() && self.add_tags.is_empty()
    }

    /// Check every write against the kind's standard fields and the tenant schema.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found: an unknown standard or
    /// custom field, a stage on a kind without pipeline, an undefined stage,
    /// or an undefined tag.
    pub fn validate(&self, kind: EntityKind, schema: &EntitySchema) -> Result<(), ValidationError> {
        for (field, value) in &self.fields {
            if field == "stage" {
                if !kind.has_stage() {
                    return Err(ValidationError::StageNotSupported(kind));
                }
                let stage = value.to_string();
                if !schema.has_stage(&stage) {
                    return Err(ValidationError::UnknownStage(stage));
                }
            } else if !kind.has_standard_field(field) {
                return Err(ValidationError::UnknownField {
                    kind,
                    field: field.clone(),
                });
            }
        }
        if let Some(key) = self
            .custom_fields
            .keys()
            .find(|key| !schema.has_custom_field(key))
        {
            return Err(ValidationError::UnknownCustomField(key.clone()));
        }
        if let Some(tag) = self.add_tags.iter().find(|tag| !schema.has_tag(tag)) {
            return Err(ValidationError::UnknownTag(tag.clone()));
        }
        Ok(())
    }

    /// Apply the patch in place and report what actually changed.
    ///
    /// Writes that leave a value untouched produce no [`FieldChange`]. When
    /// anything changed, `version` is incremented and `updated_at` set to `at`.
    pub fn apply(&self, entity: &mut CrmEntity, at: Timestamp) -> Vec<FieldChange> {
        let mut changes = Vec::new();

        for (field, value) in &self.fields {
            if let Some(change) = write_value(&mut entity.fields, field, value) {
                changes.push(FieldChange {
                    field: field.clone(),
                    ..change
                });
            }
        }

        for (key, value) in &self.custom_fields {
            if let Some(change) = write_value(&mut entity.custom_fields, key, value) {
                changes.push(FieldChange {
                    field: format!("{CUSTOM_FIELD_PREFIX}{key}"),
                    ..change
                });
            }
        }

        let before = tags_value(&entity.tags);
        let mut tags_changed = false;
        for tag in &self.add_tags {
            if !entity.has_tag(tag) {
                entity.tags.insert(tag.clone());
                tags_changed = true;
            }
        }
        if tags_changed {
            changes.push(FieldChange {
                field: TAGS_FIELD.to_string(),
                from: before,
                to: tags_value(&entity.tags),
            });
        }

        if !changes.is_empty() {
            entity.version += 1;
            entity.updated_at = at;
        }
        changes
    }
}

fn write_value(
    map: &mut BTreeMap<String, FieldValue>,
    key: &str,
    value: &FieldValue,
) -> Option<FieldChange> {
    let from = map.get(key).cloned().unwrap_or_default();
    if &from == value {
        return None;
    }
    if value == &FieldValue::Null {
        map.remove(key);
    } else {
        map.insert(key.to_string(), value.clone());
    }
    Some(FieldChange {
        field: String::new(),
        from,
        to: value.clone(),
    })
}

fn tags_value(tags: &BTreeSet<String>) -> FieldValue {
    FieldValue::List(tags.iter().cloned().collect())
}
