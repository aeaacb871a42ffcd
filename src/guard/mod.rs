use async_trait::async_trait;
use axum::http::{HeaderName, request::Parts};

/// Standard Result type for Guard
/// Ok(Some(user)) means allowed as `user`
/// Ok(None) means allowed anonymously
/// Err(GuardError) means denied
pub type GuardResult = Result<Option<String>, GuardError>;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// The Guard trait
///
/// Guards run in the pipeline's `Authenticated` step, before dispatch. A
/// denial never reaches the handler; it is raised as an `Authentication` or
/// `PermissionDenied` exception and rendered like any other failure.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    /// Guards see the request head only; the body is left for the handler.
    async fn can_activate(&self, parts: &Parts) -> GuardResult;
}

/// Resolves the acting user from a header set by an upstream session layer.
///
/// Requests under a protected prefix without the header are unauthorized;
/// everything else passes, anonymously if the header is absent.
pub struct HeaderSessionGuard {
    header: HeaderName,
    protected: Vec<String>,
}

impl HeaderSessionGuard {
    pub fn new(header: HeaderName) -> Self {
        Self {
            header,
            protected: Vec::new(),
        }
    }

    pub fn protect(mut self, prefix: impl Into<String>) -> Self {
        self.protected.push(prefix.into());
        self
    }

    fn is_protected(&self, path: &str) -> bool {
        self.protected.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[async_trait]
impl Guard for HeaderSessionGuard {
    async fn can_activate(&self, parts: &Parts) -> GuardResult {
        let user = parts
            .headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        match user {
            Some(user) => Ok(Some(user)),
            None if self.is_protected(parts.uri.path()) => Err(GuardError::Unauthorized(
                "Your session has expired. Please log in again.".to_string(),
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn guard() -> HeaderSessionGuard {
        HeaderSessionGuard::new(HeaderName::from_static("x-session-user")).protect("/app")
    }

    #[tokio::test]
    async fn test_header_resolves_user() {
        let (parts, _) = Request::builder()
            .uri("/app/orders")
            .header("x-session-user", "alice@example.com")
            .body(())
            .unwrap()
            .into_parts();
        let user = guard().can_activate(&parts).await.unwrap();
        assert_eq!(user.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_protected_path_without_session_is_denied() {
        let (parts, _) = Request::builder().uri("/app/orders").body(()).unwrap().into_parts();
        let result = guard().can_activate(&parts).await;
        assert!(matches!(result, Err(GuardError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_public_path_is_anonymous() {
        let (parts, _) = Request::builder().uri("/about").body(()).unwrap().into_parts();
        assert_eq!(guard().can_activate(&parts).await.unwrap(), None);
    }
}
