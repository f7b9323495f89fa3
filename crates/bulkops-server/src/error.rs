use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bulkops_core::error::BulkError;

/// Carries an explicit 404 through the `anyhow::Error` chain for lookups
/// that have no `BulkError` variant, such as run records.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct NotFoundError(String);

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }
}

fn status_for(err: &BulkError) -> StatusCode {
    match err {
        BulkError::ProjectNotFound(_)
        | BulkError::EnvironmentNotFound(_)
        | BulkError::SystemNotFound { .. }
        | BulkError::UnknownAction(_) => StatusCode::NOT_FOUND,
        BulkError::Decode { .. } | BulkError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        BulkError::LockTimeout { .. } => StatusCode::CONFLICT,
        BulkError::Resolution(_) | BulkError::Http(_) | BulkError::Report(_) => {
            StatusCode::BAD_GATEWAY
        }
        BulkError::TaskFailed { .. }
        | BulkError::TaskPanicked(_)
        | BulkError::Cancelled
        | BulkError::Serialize(_)
        | BulkError::Delivery(_)
        | BulkError::Io(_)
        | BulkError::Yaml(_)
        | BulkError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<NotFoundError>().is_some() {
            StatusCode::NOT_FOUND
        } else if let Some(e) = self.0.downcast_ref::<BulkError>() {
            status_for(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(err: BulkError) -> StatusCode {
        AppError(err.into()).into_response().status()
    }

    #[test]
    fn missing_catalog_entries_map_to_404() {
        assert_eq!(status(BulkError::ProjectNotFound("p".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(BulkError::UnknownAction("purge".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(BulkError::SystemNotFound {
                environment: "qa1".into(),
                system: "db".into()
            }),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn held_lock_maps_to_409() {
        let err = BulkError::LockTimeout {
            key: "/ws/bulk/cleanup p".into(),
            waited: Duration::from_secs(600),
        };
        assert_eq!(status(err), StatusCode::CONFLICT);
    }

    #[test]
    fn bad_input_maps_to_400() {
        assert_eq!(status(BulkError::InvalidConfig("x".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_failures_map_to_502() {
        assert_eq!(status(BulkError::Resolution("down".into())), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn io_error_maps_to_500() {
        let io_err = std::io::Error::other("disk full");
        assert_eq!(status(BulkError::Io(io_err)), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn non_bulk_error_maps_to_500() {
        let response = AppError(anyhow::anyhow!("something unexpected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_constructor_maps_to_404() {
        let response = AppError::not_found("run 42 not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError(BulkError::ProjectNotFound("p".into()).into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
