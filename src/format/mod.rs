//! Response formatting
//!
//! Turns a raised [`AppException`] into the final wire response: a JSON
//! [`ErrorEnvelope`] for API clients, a branded HTML page for browsers. The
//! formatter has no side effects beyond building the response.

use crate::common::{ErrorEnvelope, Indicator, response::DEFAULT_TITLE};
use crate::exception::{AppException, ExceptionKind, classify};
use crate::redaction::Redactor;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

mod negotiate;
mod page;

pub use negotiate::ResponseFormat;
pub use page::{DefaultPageRenderer, PageRenderer, escape_html};

pub struct ResponseFormatter {
    redactor: Redactor,
    renderer: Arc<dyn PageRenderer>,
}

impl ResponseFormatter {
    pub fn new(redactor: Redactor, renderer: Arc<dyn PageRenderer>) -> Self {
        Self { redactor, renderer }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn format(&self, exception: &AppException, format: ResponseFormat) -> Response {
        // Session state on the client is invalid; negotiation can't be trusted.
        if exception.kind() == ExceptionKind::ServiceUnavailable {
            return self.session_stopped(exception);
        }

        match format {
            ResponseFormat::Json => self.envelope(exception).into_response(),
            ResponseFormat::Html => self.html(exception),
        }
    }

    pub fn envelope(&self, exception: &AppException) -> ErrorEnvelope {
        let classification = classify(exception);
        ErrorEnvelope::new(classification.status.as_u16(), classification.message)
            .with_title(exception.title().unwrap_or(DEFAULT_TITLE))
            .with_indicator(exception.indicator())
            .with_correlation_id(exception.correlation_id())
            .with_exc_type(classification.kind.as_ref())
            .with_traceback(self.redactor.reveal(|| exception.traceback()))
    }

    fn html(&self, exception: &AppException) -> Response {
        let classification = classify(exception);
        let status = classification.status;
        match status {
            StatusCode::UNAUTHORIZED => self.renderer.render_html_page(
                ExceptionKind::Authentication.default_title(),
                &format!(
                    "<p>Your session has expired, please log in again to continue.</p>\
                     <p><a class=\"btn btn-primary\" href=\"{}\">Log in</a></p>",
                    escape_html(self.renderer.login_path())
                ),
                status,
                Indicator::Red,
            ),
            StatusCode::FORBIDDEN => self.renderer.render_html_page(
                ExceptionKind::PermissionDenied.default_title(),
                &paragraph(ExceptionKind::PermissionDenied.default_message()),
                status,
                Indicator::Red,
            ),
            StatusCode::NOT_FOUND => self.renderer.render_html_page(
                ExceptionKind::NotFound.default_title(),
                &paragraph(ExceptionKind::NotFound.default_message()),
                status,
                Indicator::Red,
            ),
            // Business failures and request rejections the user can act on.
            status if status.is_client_error() => self.renderer.render_html_page(
                exception
                    .title()
                    .unwrap_or(classification.kind.default_title()),
                &paragraph(&classification.message),
                status,
                exception.indicator(),
            ),
            _ => {
                let mut body = paragraph(&classification.message);
                if let Some(trace) = self.redactor.reveal(|| exception.traceback()) {
                    body.push_str(&format!("<pre class=\"traceback\">{}</pre>", escape_html(&trace)));
                }
                self.renderer.render_html_page(
                    ExceptionKind::Internal.default_title(),
                    &body,
                    status,
                    exception.indicator(),
                )
            }
        }
    }

    fn session_stopped(&self, exception: &AppException) -> Response {
        self.renderer.render_html_page(
            ExceptionKind::ServiceUnavailable.default_title(),
            &paragraph(ExceptionKind::ServiceUnavailable.default_message()),
            classify(exception).status,
            Indicator::Orange,
        )
    }
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self::new(Redactor::default(), Arc::new(DefaultPageRenderer::default()))
    }
}

fn paragraph(text: &str) -> String {
    format!("<p>{}</p>", escape_html(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use crate::redaction::StaticTraceFlags;
    use axum::body::to_bytes;
    use axum::http::header;

    fn formatter(development_mode: bool) -> ResponseFormatter {
        ResponseFormatter::new(
            Redactor::new(Arc::new(StaticTraceFlags {
                development_mode,
                suppressed: false,
            })),
            Arc::new(DefaultPageRenderer::default()),
        )
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_validation_json_envelope() {
        let exception = AppException::validation("Quantity must be greater than 0.");
        let response = formatter(false).format(&exception, ResponseFormat::Json);
        assert_eq!(response.status(), StatusCode::EXPECTATION_FAILED);

        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["message"], "Quantity must be greater than 0.");
        assert_eq!(json["indicator"], "red");
        assert_eq!(json["exception_raised"], 1);
        assert_eq!(json["status_code"], 417);
        assert_eq!(json["exc_type"], "Validation");
        assert!(json.get("traceback").is_none());
    }

    #[tokio::test]
    async fn test_envelope_carries_correlation_id() {
        let id = CorrelationId::new();
        let exception = AppException::conflict("Stock entry was modified").attach(id);
        let envelope = formatter(false).envelope(&exception);
        assert_eq!(envelope.correlation_id, Some(id));
    }

    #[tokio::test]
    async fn test_html_status_specific_pages() {
        let f = formatter(false);
        let cases = [
            (AppException::authentication("x"), "Session Expired"),
            (AppException::permission_denied("x"), "Not Permitted"),
            (AppException::not_found("x"), "Not Found"),
            (AppException::internal(anyhow::anyhow!("boom")), "Server Error"),
        ];
        for (exception, title) in cases {
            let status = exception.status();
            let response = f.format(&exception, ResponseFormat::Html);
            assert_eq!(response.status(), status);
            assert!(
                response.headers()[header::CONTENT_TYPE]
                    .to_str()
                    .unwrap()
                    .starts_with("text/html")
            );
            assert!(body_text(response).await.contains(title), "{title}");
        }
    }

    #[tokio::test]
    async fn test_trace_hidden_in_production() {
        let exception = AppException::internal(anyhow::anyhow!("secret dsn=postgres://root@db"));
        let body = body_text(formatter(false).format(&exception, ResponseFormat::Html)).await;
        assert!(!body.contains("postgres://"));
        assert!(!body.contains("traceback"));
    }

    #[tokio::test]
    async fn test_trace_shown_escaped_in_development() {
        let exception = AppException::internal(anyhow::anyhow!("bad <tag> in template"));
        let body = body_text(formatter(true).format(&exception, ResponseFormat::Html)).await;
        assert!(body.contains("class=\"traceback\""));
        assert!(body.contains("bad &lt;tag&gt; in template"));
    }

    #[tokio::test]
    async fn test_html_business_failure_uses_exception_title() {
        let exception = AppException::conflict("Stock Entry SE-0004 was modified")
            .with_title("Document Modified");
        let response = formatter(false).format(&exception, ResponseFormat::Html);
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_text(response).await;
        assert!(body.contains("Document Modified"));
        assert!(body.contains("Stock Entry SE-0004 was modified"));
    }

    #[tokio::test]
    async fn test_session_stopped_ignores_json_preference() {
        let exception = AppException::service_unavailable("restarting workers");
        let response = formatter(false).format(&exception, ResponseFormat::Json);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_text(response).await;
        assert!(body.contains("Updating"));
        assert!(body.contains("indicator orange"));
    }

    #[tokio::test]
    async fn test_html_rejection_is_not_a_server_error_page() {
        let exception = AppException::from_status(
            StatusCode::METHOD_NOT_ALLOWED,
            Some("Method not allowed on this route".into()),
        );
        let response = formatter(false).format(&exception, ResponseFormat::Html);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_text(response).await;
        assert!(body.contains("Method not allowed on this route"));
        assert!(!body.contains("Server Error"));
    }
}
