//! Devalloc Controller - scheduling-time device allocation service
//!
//! This is the main entry point for the controller service. It exposes the
//! driver callbacks to the claim reconciliation engine over HTTP.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check
//!
//! ## Driver Callbacks
//! - `POST /v1/class-parameters` - Resolve a class's parameters
//! - `POST /v1/claim-parameters` - Resolve a claim's parameters
//! - `POST /v1/allocate` - Allocate devices for a claim
//! - `POST /v1/deallocate` - Release a claim's devices
//! - `POST /v1/unsuitable-nodes` - Filter candidate nodes for a claim batch

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use devalloc_controller::{
    AllocationResult, ClaimAllocation, ControllerConfig, ControllerError, DeviceController,
    Driver, ResourceClaim, ResourceClass, WorkerPool,
};
use devalloc_core::NodeName;
use devalloc_crd::{ClaimParameters, ClassParameters, KubeParameterStore, KubeRecordStore};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    controller: Arc<DeviceController>,
    pool: WorkerPool,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "devalloc-controller",
    })
}

async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

// ============================================================================
// Driver Endpoints
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

fn error_response(e: &ControllerError) -> Response {
    let code = e.http_status_code();
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(e.to_string(), code)),
    )
        .into_response()
}

fn pool_closed() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::new("worker pool is shut down", 503)),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassParametersRequest {
    class: ResourceClass,
}

/// POST /v1/class-parameters
async fn class_parameters_handler(
    State(state): State<AppState>,
    Json(req): Json<ClassParametersRequest>,
) -> Response {
    let result = state
        .pool
        .run(state.controller.get_class_parameters(&req.class))
        .await;

    match result {
        Some(Ok(params)) => Json(params).into_response(),
        Some(Err(e)) => {
            tracing::warn!(class = %req.class.name, error = %e, "Failed to resolve class parameters");
            error_response(&e)
        }
        None => pool_closed(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimParametersRequest {
    claim: ResourceClaim,
    class: ResourceClass,
    #[serde(default)]
    class_parameters: ClassParameters,
}

/// POST /v1/claim-parameters
async fn claim_parameters_handler(
    State(state): State<AppState>,
    Json(req): Json<ClaimParametersRequest>,
) -> Response {
    let result = state
        .pool
        .run(
            state
                .controller
                .get_claim_parameters(&req.claim, &req.class, &req.class_parameters),
        )
        .await;

    match result {
        Some(Ok(params)) => Json(params).into_response(),
        Some(Err(e)) => {
            tracing::warn!(claim = %req.claim.uid, error = %e, "Failed to resolve claim parameters");
            error_response(&e)
        }
        None => pool_closed(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AllocateRequest {
    claim: ResourceClaim,
    #[serde(default)]
    claim_parameters: ClaimParameters,
    class: ResourceClass,
    #[serde(default)]
    class_parameters: ClassParameters,
    #[serde(default)]
    selected_node: Option<NodeName>,
}

/// POST /v1/allocate
async fn allocate_handler(
    State(state): State<AppState>,
    Json(req): Json<AllocateRequest>,
) -> Response {
    let result = state
        .pool
        .run(state.controller.allocate(
            &req.claim,
            &req.claim_parameters,
            &req.class,
            &req.class_parameters,
            req.selected_node.as_ref(),
        ))
        .await;

    match result {
        Some(Ok(allocation)) => {
            tracing::info!(
                claim = %req.claim.uid,
                node = ?allocation.selected_node().map(NodeName::into_inner),
                "Allocated claim via HTTP API"
            );
            Json::<AllocationResult>(allocation).into_response()
        }
        Some(Err(e)) => {
            tracing::error!(claim = %req.claim.uid, error = %e, "Failed to allocate claim");
            error_response(&e)
        }
        None => pool_closed(),
    }
}

#[derive(Debug, Deserialize)]
struct DeallocateRequest {
    claim: ResourceClaim,
}

/// POST /v1/deallocate
async fn deallocate_handler(
    State(state): State<AppState>,
    Json(req): Json<DeallocateRequest>,
) -> Response {
    match state.pool.run(state.controller.deallocate(&req.claim)).await {
        Some(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Some(Err(e)) => {
            tracing::error!(claim = %req.claim.uid, error = %e, "Failed to deallocate claim");
            error_response(&e)
        }
        None => pool_closed(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnsuitableNodesRequest {
    claims: Vec<ClaimAllocation>,
    potential_nodes: Vec<NodeName>,
}

#[derive(Debug, Serialize)]
struct UnsuitableNodesResponse {
    claims: Vec<ClaimAllocation>,
}

/// POST /v1/unsuitable-nodes
async fn unsuitable_nodes_handler(
    State(state): State<AppState>,
    Json(mut req): Json<UnsuitableNodesRequest>,
) -> Response {
    let result = state
        .pool
        .run(
            state
                .controller
                .unsuitable_nodes(&mut req.claims, &req.potential_nodes),
        )
        .await;

    match result {
        Some(Ok(())) => Json(UnsuitableNodesResponse { claims: req.claims }).into_response(),
        Some(Err(e)) => {
            tracing::error!(error = %e, "Failed to filter nodes");
            error_response(&e)
        }
        None => pool_closed(),
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Driver callbacks
        .route("/v1/class-parameters", post(class_parameters_handler))
        .route("/v1/claim-parameters", post(claim_parameters_handler))
        .route("/v1/allocate", post(allocate_handler))
        .route("/v1/deallocate", post(deallocate_handler))
        .route("/v1/unsuitable-nodes", post(unsuitable_nodes_handler))
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

    tracing::info!("Starting devalloc controller");

    let config = ControllerConfig::from_env();
    config.validate()?;

    tracing::info!(
        namespace = %config.namespace,
        workers = config.workers,
        timeout_secs = config.request_timeout.as_secs(),
        "Loaded controller configuration"
    );

    let client = kube::Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let records = Arc::new(KubeRecordStore::new(
        client.clone(),
        &config.namespace,
        config.request_timeout,
    ));
    let parameters = Arc::new(KubeParameterStore::new(client, config.request_timeout));

    let pool = WorkerPool::new(config.workers);
    tracing::info!(workers = pool.size(), "Worker pool ready");

    let state = AppState {
        controller: Arc::new(DeviceController::new(records, parameters)),
        pool: pool.clone(),
    };

    let app = create_router(state);

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pool))
        .await?;

    tracing::info!("Controller stopped");
    Ok(())
}

/// Resolves on Ctrl+C, after which the pool turns away new driver calls.
async fn shutdown_signal(pool: WorkerPool) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal, draining in-flight requests");
    pool.close();
}
