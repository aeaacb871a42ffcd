use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, StatusCode, response::Parts},
    routing::{get, post},
};
use faultline::prelude::*;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod inventory;

use inventory::{InventoryStore, InventoryTransaction};

#[derive(Deserialize)]
struct IssueRequest {
    qty: i64,
}

#[derive(Serialize)]
struct StockLevel {
    item_code: String,
    qty: i64,
}

/// Echoes the request id so clients can quote it when reporting a failure.
struct RequestIdHook;

#[async_trait]
impl AfterRequestHook for RequestIdHook {
    fn name(&self) -> &str {
        "request-id"
    }

    async fn after_request(&self, ctx: &RequestContext, response: &mut Parts) -> anyhow::Result<()> {
        response.headers.insert(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_str(&ctx.request_id().to_string())?,
        );
        Ok(())
    }
}

async fn stock_level(
    State(store): State<InventoryStore>,
    Path(code): Path<String>,
) -> Result<Json<StockLevel>, AppException> {
    let qty = store
        .level(&code)
        .await
        .ok_or_else(|| AppException::not_found(format!("Item {code} not found")))?;
    Ok(Json(StockLevel { item_code: code, qty }))
}

async fn issue_stock(
    ctx: RequestContext,
    State(store): State<InventoryStore>,
    Path(code): Path<String>,
    Json(request): Json<IssueRequest>,
) -> Result<StatusCode, AppException> {
    if request.qty <= 0 {
        return Err(ctx.throw(ExceptionKind::Validation, "Quantity must be greater than 0."));
    }

    let available = store
        .level(&code)
        .await
        .ok_or_else(|| AppException::not_found(format!("Item {code} not found")))?;
    if available < request.qty {
        return Err(ctx.throw_titled(
            ExceptionKind::Validation,
            "Insufficient Stock",
            format!("Only {available} units of {code} are available."),
        ));
    }

    let tx = get_current_transaction()
        .ok_or_else(|| AppException::internal(FaultlineError::Internal("no active transaction".into())))?;
    let mut tx = tx.0.lock().await;
    let inventory = tx
        .as_any_mut()
        .downcast_mut::<InventoryTransaction>()
        .ok_or_else(|| AppException::internal(FaultlineError::Internal("unexpected transaction type".into())))?;
    inventory.adjust(&code, -request.qty)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn maintenance() -> Result<(), AppException> {
    Err(AppException::service_unavailable("Workers are restarting"))
}

async fn broken_report(ctx: RequestContext) -> Result<(), AppException> {
    let id = ctx.stage(
        "The stock ledger report could not be generated.",
        Some("Report Failed".into()),
        Indicator::Red,
    );
    Err(AppException::internal(anyhow::anyhow!("division by zero in valuation rate")).attach(id))
}

async fn dashboard(ctx: RequestContext) -> String {
    format!("Welcome back, {}", ctx.acting_user().unwrap_or("Guest"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting demo server...");

    let store = InventoryStore::seeded();
    let pipeline = FaultPipeline::builder()
        .guard(Arc::new(
            HeaderSessionGuard::new(HeaderName::from_static("x-session-user")).protect("/app"),
        ))
        .transaction_manager(Arc::new(store.clone()))
        .snapshot_sink(Arc::new(TracingSnapshotSink))
        .hook(Arc::new(RequestIdHook))
        .build();

    let router = Router::new()
        .route("/api/items/{code}", get(stock_level))
        .route("/api/items/{code}/issue", post(issue_stock))
        .route("/api/maintenance", get(maintenance))
        .route("/desk/stock-ledger", get(broken_report))
        .route("/app/dashboard", get(dashboard))
        .with_state(store)
        .layer(FaultLayer::new(pipeline))
        .layer(TraceLayer::new_for_http());

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);

    tracing::info!("Server running on http://127.0.0.1:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Initiating graceful shutdown...");
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
