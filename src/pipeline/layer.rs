use super::FaultPipeline;
use axum::{body::Body, http::Request, response::Response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};

/// Tower layer installing a [`FaultPipeline`] around a service.
#[derive(Clone)]
pub struct FaultLayer {
    pipeline: Arc<FaultPipeline>,
}

impl FaultLayer {
    pub fn new(pipeline: FaultPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn from_shared(pipeline: Arc<FaultPipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for FaultLayer {
    type Service = FaultService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FaultService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Middleware produced by [`FaultLayer`].
///
/// Infallible: inner errors, panics and readiness failures all come back as
/// rendered error responses.
#[derive(Clone)]
pub struct FaultService<S> {
    inner: S,
    pipeline: Arc<FaultPipeline>,
}

impl<S> Service<Request<Body>> for FaultService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness of the inner service is driven per request in `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        let inner = self.inner.clone();

        Box::pin(async move { Ok(pipeline.handle(inner, request).await) })
    }
}
