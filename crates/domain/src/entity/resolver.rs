//! Field resolution: entity + field name → typed value.

use super::{CrmEntity, FieldValue};

/// Canonical prefix for addressing custom fields.
pub const CUSTOM_FIELD_PREFIX: &str = "customFields.";

const CUSTOM_FIELD_ALIASES: &[&str] = &[CUSTOM_FIELD_PREFIX, "custom_fields.", "custom."];

/// Resolve `field` on `entity`.
///
/// Returns `None` for fields the entity does not carry; callers treat that
/// as "not found" rather than an error.
#[must_use]
pub fn resolve(entity: &CrmEntity, field: &str) -> Option<FieldValue> {
    match field {
        "id" => return Some(FieldValue::Text(entity.id.to_string())),
        "tags" => return Some(FieldValue::List(entity.tags.iter().cloned().collect())),
        _ => {}
    }

    if let Some(key) = custom_field_key(field) {
        return entity.custom_fields.get(key).cloned();
    }

    if let Some(value) = entity.fields.get(field) {
        return Some(value.clone());
    }

    let snake = to_snake_case(field);
    if snake == field {
        return None;
    }
    entity.fields.get(&snake).cloned()
}

/// Strip any accepted custom-field prefix from `field`.
#[must_use]
pub fn custom_field_key(field: &str) -> Option<&str> {
    CUSTOM_FIELD_ALIASES
        .iter()
        .find_map(|prefix| field.strip_prefix(prefix))
        .filter(|key| !key.is_empty())
}

fn to_snake_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for c in field.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
