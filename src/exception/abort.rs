use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

/// A transport-level abort: the response is already fully formed.
///
/// The coordinator sends it back verbatim. It is never classified and never
/// recorded as an application error, although the request still counts as
/// failed for transaction purposes.
///
/// # Example
/// ```
/// use faultline::exception::HttpAbort;
/// use axum::http::{StatusCode, header};
///
/// let abort = HttpAbort::new((
///     StatusCode::TEMPORARY_REDIRECT,
///     [(header::LOCATION, "/login")],
/// ));
/// assert_eq!(abort.status(), StatusCode::TEMPORARY_REDIRECT);
/// ```
pub struct HttpAbort {
    response: Response,
}

impl HttpAbort {
    pub fn new(response: impl IntoResponse) -> Self {
        Self {
            response: response.into_response(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }
}

impl fmt::Debug for HttpAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAbort")
            .field("status", &self.response.status())
            .finish()
    }
}

impl fmt::Display for HttpAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request aborted with status {}", self.response.status())
    }
}

impl std::error::Error for HttpAbort {}

/// Response extension marking an abort.
#[derive(Clone, Copy)]
pub(crate) struct AbortMarker;

impl IntoResponse for HttpAbort {
    fn into_response(self) -> Response {
        let mut response = self.response;
        response.extensions_mut().insert(AbortMarker);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_keeps_response_and_marks_it() {
        let response = HttpAbort::new((StatusCode::IM_A_TEAPOT, "short and stout")).into_response();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert!(response.extensions().get::<AbortMarker>().is_some());
    }
}
