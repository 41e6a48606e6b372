//! Entity kind — which CRM record type an entity is.

use serde::{Deserialize, Serialize};

const CONTACT_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "phone",
    "company",
    "job_title",
    "city",
    "state",
    "country",
    "status",
    "source",
    "lead_score",
    "owner_id",
];

const DEAL_FIELDS: &[&str] = &[
    "title",
    "value",
    "currency",
    "stage",
    "probability",
    "expected_close_date",
    "owner_id",
    "contact_id",
];

/// The two record types automations operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Contact,
    Deal,
}

impl EntityKind {
    /// Standard (non-custom) field names defined for this kind.
    #[must_use]
    pub fn standard_fields(self) -> &'static [&'static str] {
        match self {
            Self::Contact => CONTACT_FIELDS,
            Self::Deal => DEAL_FIELDS,
        }
    }

    /// Whether `field` is one of this kind's standard fields.
    #[must_use]
    pub fn has_standard_field(self, field: &str) -> bool {
        self.standard_fields().contains(&field)
    }

    /// Whether records of this kind move through a pipeline of stages.
    #[must_use]
    pub fn has_stage(self) -> bool {
        matches!(self, Self::Deal)
    }

    /// Lowercase name, as used in storage and URLs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Deal => "deal",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" | "contacts" => Ok(Self::Contact),
            "deal" | "deals" => Ok(Self::Deal),
            other => Err(crate::error::ValidationError::Unrecognized(format!(
                "unknown entity type {other:?}"
            ))),
        }
    }
}
