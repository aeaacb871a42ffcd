//! After-request hooks
//!
//! Hooks run in `Finalizing`, after the response has been built, on success
//! and failure alike. Each hook is isolated: a failing hook is logged and the
//! remaining hooks still run. Hooks only see the response head, and a hook
//! that fails has its status and header changes undone, so it can never
//! replace the response with its own error or send the request back through
//! the pipeline.

use crate::correlation::RequestContext;
use crate::error::FaultlineError;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::response::Parts;
use axum::response::Response;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

#[async_trait]
pub trait AfterRequestHook: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn after_request(&self, ctx: &RequestContext, response: &mut Parts) -> anyhow::Result<()>;
}

/// Runs registered hooks in registration order.
#[derive(Clone, Default)]
pub struct HookRunner {
    hooks: Vec<Arc<dyn AfterRequestHook>>,
}

impl HookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn AfterRequestHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook and returns the failures that were swallowed.
    pub async fn run(&self, ctx: &RequestContext, response: &mut Response) -> Vec<FaultlineError> {
        let mut failures = Vec::new();
        if self.hooks.is_empty() {
            return failures;
        }

        let (mut head, body) = std::mem::replace(response, Response::new(Body::empty())).into_parts();
        for hook in &self.hooks {
            let status = head.status;
            let version = head.version;
            let headers = head.headers.clone();

            let outcome = AssertUnwindSafe(hook.after_request(ctx, &mut head))
                .catch_unwind()
                .await;
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("panicked: {}", crate::pipeline::panic_message(&panic)),
            };

            head.status = status;
            head.version = version;
            head.headers = headers;
            // Log error but continue with other hooks
            tracing::error!(
                hook = hook.name(),
                request_id = %ctx.request_id(),
                error = %message,
                "After-request hook failed"
            );
            failures.push(FaultlineError::hook_failed(hook.name(), message));
        }
        *response = Response::from_parts(head, body);
        failures
    }
}
