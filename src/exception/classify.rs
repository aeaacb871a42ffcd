use super::{AppException, ExceptionKind};
use crate::guard::GuardError;
use axum::http::StatusCode;
use std::error::Error;

/// Result of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ExceptionKind,
    pub status: StatusCode,
    pub message: String,
}

/// Resolves kind, status and message for a raised exception.
///
/// An explicit status on the exception wins over the table default. Pure: no
/// logging, no I/O.
pub fn classify(exception: &AppException) -> Classification {
    Classification {
        kind: exception.kind(),
        status: exception.status(),
        message: exception.message().to_string(),
    }
}

/// Classifies an arbitrary error.
///
/// Walks the error and its `source()` chain and uses the first recognised
/// failure, outermost first. Anything unrecognised is `Internal`.
pub fn classify_error(error: &(dyn Error + 'static)) -> Classification {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(exception) = err.downcast_ref::<AppException>() {
            return classify(exception);
        }
        if let Some(guard) = err.downcast_ref::<GuardError>() {
            let kind = match guard {
                GuardError::Unauthorized(_) => ExceptionKind::Authentication,
                GuardError::Forbidden(_) => ExceptionKind::PermissionDenied,
            };
            return Classification {
                kind,
                status: kind.default_status(),
                message: guard.to_string(),
            };
        }
        current = err.source();
    }

    Classification {
        kind: ExceptionKind::Internal,
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: ExceptionKind::Internal.default_message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[derive(Debug, thiserror::Error)]
    #[error("repository failed")]
    struct RepositoryError {
        #[source]
        cause: AppException,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct UnknownError;

    #[test]
    fn test_default_status_table() {
        let expected = [
            (ExceptionKind::Validation, 417),
            (ExceptionKind::Authentication, 401),
            (ExceptionKind::PermissionDenied, 403),
            (ExceptionKind::NotFound, 404),
            (ExceptionKind::Conflict, 409),
            (ExceptionKind::ServiceUnavailable, 503),
            (ExceptionKind::Internal, 500),
        ];
        assert_eq!(expected.len(), ExceptionKind::iter().count());

        for (kind, status) in expected {
            let classification = classify(&AppException::new(kind, "x"));
            assert_eq!(classification.kind, kind);
            assert_eq!(classification.status.as_u16(), status, "{kind}");
        }
    }

    #[test]
    fn test_status_override_wins_for_every_kind() {
        for kind in ExceptionKind::iter() {
            let exception = AppException::new(kind, "x").with_status(StatusCode::IM_A_TEAPOT);
            assert_eq!(classify(&exception).status, StatusCode::IM_A_TEAPOT);
            assert_eq!(classify(&exception).kind, kind);
        }
    }

    #[test]
    fn test_classify_error_finds_nested_exception() {
        let err = RepositoryError {
            cause: AppException::not_found("Item ITEM-0001 not found"),
        };
        let classification = classify_error(&err);
        assert_eq!(classification.kind, ExceptionKind::NotFound);
        assert_eq!(classification.message, "Item ITEM-0001 not found");
    }

    #[test]
    fn test_unknown_error_is_internal() {
        let classification = classify_error(&UnknownError);
        assert_eq!(classification.kind, ExceptionKind::Internal);
        assert_eq!(classification.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_ne!(classification.message, "disk on fire");
    }

    #[test]
    fn test_guard_error_classified_directly() {
        let classification = classify_error(&GuardError::Forbidden("tenant mismatch".into()));
        assert_eq!(classification.status, StatusCode::FORBIDDEN);
    }
}
