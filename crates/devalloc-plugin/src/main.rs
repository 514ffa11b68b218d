//! Devalloc Plugin - node-resident device preparation service
//!
//! This is the main entry point for the node plugin. It brings the node's
//! devices online and serves prepare/unprepare calls from the node runtime.
//!
//! # HTTP Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//! - `POST /v1/claims/:uid/prepare` - Prepare a claim's devices
//! - `POST /v1/claims/:uid/unprepare` - Release a claim's devices

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use devalloc_core::ClaimUid;
use devalloc_crd::KubeRecordStore;
use devalloc_plugin::{
    enumerate_devices, CdiRegistry, NodeDriver, NodePlugin, PluginConfig, PluginError,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    plugin: Arc<dyn NodePlugin>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "devalloc-plugin",
    })
}

async fn ready_handler() -> impl IntoResponse {
    // The router is only served once the node driver has started.
    (StatusCode::OK, "ready")
}

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

/// Wraps a plugin error so handlers can return it directly.
struct PluginErrorResponse(PluginError);

impl IntoResponse for PluginErrorResponse {
    fn into_response(self) -> Response {
        let code = self.0.http_status_code();
        (
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(ErrorResponse {
                error: self.0.to_string(),
                code,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareResponse {
    cdi_devices: Vec<String>,
}

/// POST /v1/claims/:uid/prepare
async fn prepare_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<PrepareResponse>, PluginErrorResponse> {
    let claim = ClaimUid::new(uid);
    match state.plugin.prepare(&claim).await {
        Ok(cdi_devices) => Ok(Json(PrepareResponse { cdi_devices })),
        Err(e) => {
            tracing::error!(claim = %claim, error = %e, "Failed to prepare claim");
            Err(PluginErrorResponse(e))
        }
    }
}

/// POST /v1/claims/:uid/unprepare
async fn unprepare_handler(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, PluginErrorResponse> {
    let claim = ClaimUid::new(uid);
    match state.plugin.unprepare(&claim).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            tracing::error!(claim = %claim, error = %e, "Failed to unprepare claim");
            Err(PluginErrorResponse(e))
        }
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/v1/claims/:uid/prepare", post(prepare_handler))
        .route("/v1/claims/:uid/unprepare", post(unprepare_handler))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,devalloc=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting devalloc node plugin");

    let config = PluginConfig::from_env()?;
    tracing::info!(
        node = %config.node_name,
        namespace = %config.namespace,
        cdi_root = %config.cdi_root.display(),
        "Loaded plugin configuration"
    );

    let client = kube::Client::try_default().await?;
    let records = Arc::new(KubeRecordStore::new(
        client,
        &config.namespace,
        config.request_timeout,
    ));

    let detected = enumerate_devices(&config.sysfs_drm_dir);
    let cdi = CdiRegistry::open(config.cdi_root.clone())?;

    let driver = NodeDriver::start(
        config.node_name.clone(),
        records,
        cdi,
        detected,
        config.retry,
    )
    .await?;

    let state = AppState {
        plugin: Arc::new(driver),
    };
    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
