//! HTTP error response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crmflow_domain::error::{CrmFlowError, ValidationError};

/// JSON error body returned by API endpoints.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps [`CrmFlowError`] to an HTTP response with appropriate status code.
#[derive(Debug)]
pub struct ApiError(CrmFlowError);

impl From<CrmFlowError> for ApiError {
    fn from(err: CrmFlowError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            CrmFlowError::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            CrmFlowError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string()),
            CrmFlowError::Conflict(err) => (StatusCode::CONFLICT, err.to_string()),
            CrmFlowError::Storage(err) => {
                tracing::error!(error = %err, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmflow_domain::error::{ConflictError, NotFoundError};

    fn status_of(err: CrmFlowError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn should_map_each_error_class_to_its_status() {
        assert_eq!(
            status_of(ValidationError::EmptyName.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                NotFoundError {
                    entity: "Automation",
                    id: "x".into(),
                }
                .into()
            ),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                ConflictError {
                    entity: "Entity",
                    id: "x".into(),
                    expected: 1,
                    actual: 2,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CrmFlowError::Storage("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
