//! Tenant-defined schema for one entity kind.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The custom fields, pipeline stages and tags a tenant has defined.
///
/// Read fresh before every automation write so a definition removed by an
/// admin is noticed instead of silently written to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(default)]
    pub custom_fields: BTreeSet<String>,
    #[serde(default)]
    pub stages: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl EntitySchema {
    #[must_use]
    pub fn has_custom_field(&self, key: &str) -> bool {
        self.custom_fields.contains(key)
    }

    #[must_use]
    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    /// Case-insensitive tag lookup.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_deserialize_with_missing_sections() {
        let schema: EntitySchema = serde_json::from_str(r#"{"stages":["new","won"]}"#).unwrap();
        assert!(schema.has_stage("won"));
        assert!(!schema.has_stage("lost"));
        assert!(schema.custom_fields.is_empty());
    }

    #[test]
    fn should_look_up_tags_ignoring_case() {
        let schema = EntitySchema {
            tags: BTreeSet::from(["New-Lead".to_string()]),
            ..EntitySchema::default()
        };
        assert!(schema.has_tag("new-lead"));
    }
}
