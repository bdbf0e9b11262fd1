//! Webhook server: health check plus asynchronous enrichment triggers.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use prospect_common::{normalize_company_url, Company};
use prospect_pipeline::runner::{PipelineDeps, PipelineRunner};

/// Cap on concurrent webhook-triggered runs; beyond it the server sheds
/// load with 503.
pub const MAX_CONCURRENT_WEBHOOK_RUNS: usize = 20;

pub struct AppState {
    pub deps: Arc<PipelineDeps>,
    pub permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self {
            deps,
            permits: Arc::new(Semaphore::new(MAX_CONCURRENT_WEBHOOK_RUNS)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrichRequest {
    pub url: Option<String>,
    pub salesforce_id: Option<String>,
    pub name: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/enrich", post(enrich))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn enrich(
    State(state): State<Arc<AppState>>,
    body: Result<Json<EnrichRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Ok(Json(request)) = body else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "malformed body"})),
        );
    };

    let Some(raw_url) = request.url.filter(|u| !u.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "url is required"})),
        );
    };

    let url = match normalize_company_url(&raw_url) {
        Ok(url) => url,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("invalid url: {e}")})),
            );
        }
    };

    let Ok(permit) = state.permits.clone().try_acquire_owned() else {
        warn!(url = url.as_str(), "Webhook capacity exhausted");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "enrichment capacity exhausted"})),
        );
    };

    let company = Company {
        lead_id: String::new(),
        name: request.name.unwrap_or_default(),
        url: url.clone(),
        salesforce_id: request.salesforce_id.filter(|s| !s.is_empty()),
        location: None,
    };

    let runner = PipelineRunner::new(state.deps.clone());
    tokio::spawn(async move {
        let _permit = permit;
        match runner.run(company).await {
            Ok(run) => info!(
                run_id = %run.id,
                status = %run.status,
                "Webhook-triggered run finished"
            ),
            Err(e) => warn!(error = %e, "Webhook-triggered run aborted"),
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "accepted", "company": url})),
    )
}

/// Bind and serve until the process is stopped.
pub async fn serve(deps: Arc<PipelineDeps>, host: &str, port: u16) -> Result<()> {
    let state = Arc::new(AppState::new(deps));
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = addr.as_str(), "Webhook server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
