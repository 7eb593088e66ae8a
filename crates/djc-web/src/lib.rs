//! HTTP surface: manual collection trigger, run reports and health.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use djc_sync::{cancel_on_ctrl_c, report_recent_runs, CollectPipeline, SyncConfig, SyncServices};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "djc-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CollectPipeline>,
    pub default_batch_size: usize,
    pub reports_dir: Option<PathBuf>,
}

impl AppState {
    pub fn from_services(services: &SyncServices) -> Self {
        Self {
            pipeline: services.pipeline.clone(),
            default_batch_size: services.config.batch_size,
            reports_dir: services.config.reports_dir.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CollectQuery {
    size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ReportsQuery {
    runs: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/collect/public",
            get(collect_public_handler).post(collect_public_handler),
        )
        .route("/reports", get(reports_handler))
        .route("/healthz", get(health_handler))
        .with_state(Arc::new(state))
}

/// Connects the store, starts the scheduler and the optional startup collection, then
/// serves until Ctrl-C.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let services = SyncServices::connect(config).await?;
    serve(services).await
}

pub async fn serve(services: SyncServices) -> anyhow::Result<()> {
    let scheduler = services.maybe_build_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!("scheduler started");
    }

    if services.config.collect_on_startup {
        let pipeline = services.pipeline.clone();
        let size = services.config.startup_batch_size;
        tokio::spawn(async move {
            info!(size, "running startup collection");
            pipeline.run_once(size).await;
        });
    }

    let port = services.config.web_port;
    let cancel = services.cancellation_token();
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "listening");
    axum::serve(listener, app(AppState::from_services(&services)))
        .with_graceful_shutdown(cancel_on_ctrl_c(cancel))
        .await?;

    if let Some(mut sched) = scheduler {
        sched.shutdown().await.context("stopping scheduler")?;
    }
    Ok(())
}

async fn collect_public_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectQuery>,
) -> Response {
    let size = query.size.unwrap_or(state.default_batch_size);
    if size == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "size must be at least 1".to_string(),
            }),
        )
            .into_response();
    }

    info!(size, "manual collection requested");
    let summary = state.pipeline.run_once(size).await;
    let status = if summary.outcome.is_failure() {
        error!(run_id = %summary.run_id, outcome = %summary.outcome, "manual collection failed");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(summary)).into_response()
}

async fn reports_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportsQuery>,
) -> Response {
    let Some(dir) = &state.reports_dir else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "run reports are not enabled".to_string(),
            }),
        )
            .into_response();
    };
    match report_recent_runs(dir, query.runs.unwrap_or(10)) {
        Ok(markdown) => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            markdown,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: format!("{err:#}"),
            }),
        )
            .into_response(),
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": CRATE_NAME }))
}
