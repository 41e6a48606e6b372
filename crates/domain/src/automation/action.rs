//! Action — a single write an automation performs on its entity.

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKind, EntityPatch, EntitySchema, FieldValue, custom_field_key};
use crate::error::ValidationError;

/// A write to the enrolled entity.
///
/// Entity-specific spellings (`update_contact_field`, `move_deal_stage`, ...)
/// are accepted on input and normalised to the generic variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Set a standard field. A `customFields.<key>` path writes the custom field.
    #[serde(alias = "update_contact_field", alias = "update_deal_field")]
    UpdateField { field: String, value: FieldValue },
    /// Set a tenant-defined custom field.
    UpdateCustomField { key: String, value: FieldValue },
    /// Add a tag (no-op when already present).
    #[serde(alias = "add_contact_tag", alias = "add_deal_tag")]
    AddTag { tag: String },
    /// Move a deal to another pipeline stage.
    #[serde(alias = "move_deal_stage")]
    MoveStage { stage: String },
}

impl Action {
    /// Turn the action into a patch, checked against `kind` and `schema`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the action addresses a field,
    /// custom field, stage or tag the schema does not define.
    pub fn to_patch(
        &self,
        kind: EntityKind,
        schema: &EntitySchema,
    ) -> Result<EntityPatch, ValidationError> {
        let patch = match self {
            Self::UpdateField { field, value } => match custom_field_key(field) {
                Some(key) => EntityPatch::default().set_custom_field(key, value.clone()),
                None => EntityPatch::default().set_field(field.clone(), value.clone()),
            },
            Self::UpdateCustomField { key, value } => {
                EntityPatch::default().set_custom_field(key.clone(), value.clone())
            }
            Self::AddTag { tag } => EntityPatch::default().add_tag(tag.clone()),
            Self::MoveStage { stage } => EntityPatch::default().set_field("stage", stage.as_str()),
        };
        patch.validate(kind, schema)?;
        Ok(patch)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdateField { field, value } => write!(f, "update_field({field} = {value})"),
            Self::UpdateCustomField { key, value } => {
                write!(f, "update_custom_field({key} = {value})")
            }
            Self::AddTag { tag } => write!(f, "add_tag({tag})"),
            Self::MoveStage { stage } => write!(f, "move_stage({stage})"),
        }
    }
}
