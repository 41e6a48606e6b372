//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`CrmFlowError`] via `#[from]`. Adapter errors are boxed into
//! [`CrmFlowError::Storage`].

use crate::entity::EntityKind;

/// Base error type shared by the domain and application layers.
#[derive(Debug, thiserror::Error)]
pub enum CrmFlowError {
    #[error("validation error")]
    Validation(#[from] ValidationError),

    #[error("not found")]
    NotFound(#[from] NotFoundError),

    #[error("conflict")]
    Conflict(#[from] ConflictError),

    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A domain invariant was violated by the caller's input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("a single-step automation needs at least one action")]
    NoActions,

    #[error("a multi-step automation needs at least one step")]
    NoSteps,

    #[error("workflow is invalid: {0}")]
    InvalidWorkflow(String),

    #[error("field {field:?} is not defined for {kind}")]
    UnknownField { kind: EntityKind, field: String },

    #[error("custom field {0:?} is not defined")]
    UnknownCustomField(String),

    #[error("pipeline stage {0:?} does not exist")]
    UnknownStage(String),

    #[error("tag {0:?} does not exist")]
    UnknownTag(String),

    #[error("{0} entities have no pipeline stage")]
    StageNotSupported(EntityKind),

    #[error("tenant mismatch between automation and entity")]
    TenantMismatch,

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unrecognized value: {0}")]
    Unrecognized(String),
}

/// A lookup by identifier found nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// An optimistic-concurrency check failed: the stored version moved on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} was modified concurrently (expected version {expected}, found {actual})")]
pub struct ConflictError {
    pub entity: &'static str,
    pub id: String,
    pub expected: u64,
    pub actual: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_validation_error_into_base_error() {
        let err: CrmFlowError = ValidationError::EmptyName.into();
        assert!(matches!(
            err,
            CrmFlowError::Validation(ValidationError::EmptyName)
        ));
    }

    #[test]
    fn should_describe_not_found_error() {
        let err = NotFoundError {
            entity: "Automation",
            id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Automation abc not found");
    }

    #[test]
    fn should_describe_conflict_error_with_versions() {
        let err = ConflictError {
            entity: "Entity",
            id: "42".to_string(),
            expected: 3,
            actual: 4,
        };
        assert!(err.to_string().contains("expected version 3, found 4"));
    }

    #[test]
    fn should_describe_unknown_field_with_kind() {
        let err = ValidationError::UnknownField {
            kind: EntityKind::Deal,
            field: "colour".to_string(),
        };
        assert_eq!(err.to_string(), "field \"colour\" is not defined for deal");
    }
}
