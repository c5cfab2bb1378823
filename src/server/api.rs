//! Operator REST API
//!
//! - `POST /rollouts` - start a rollout (201, 400 invalid, 409 duplicate)
//! - `GET /rollouts/{service}` - point-in-time status (200, 404)
//! - `POST /rollouts/{service}/abort` - roll back on the next tick (202)
//! - `POST /rollouts/{service}/promote` - skip the current soak (202)
//!
//! Health and metrics endpoints share the same router; see `health`.

use crate::controller::{OperatorError, RolloutManager, StartRollout};
use crate::plan::{
    parse_duration, ConfigError, HealthConfig, Pool, RetryConfig, RolloutConfig, RouteConfig,
    StrategyKind, TrafficPlan,
};
use crate::server::health::{self, ReadinessState};
use crate::server::metrics::SharedMetrics;
use crate::server::shutdown::ShutdownSignal;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Shared state for every endpoint
#[derive(Clone)]
pub struct AppState {
    pub readiness: ReadinessState,
    pub metrics: SharedMetrics,
    pub manager: Arc<RolloutManager>,
}

impl AppState {
    pub fn new(
        readiness: ReadinessState,
        metrics: SharedMetrics,
        manager: Arc<RolloutManager>,
    ) -> Self {
        Self {
            readiness,
            metrics,
            manager,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRolloutRequest {
    pub service_name: String,
    pub strategy: StrategyKind,
    pub source_pool: String,
    pub source_version: String,
    pub target_pool: String,
    pub target_version: String,
    pub config: RolloutConfigRequest,
}

/// Rollout configuration as submitted over the wire
///
/// Durations come in as human-readable strings ("60s", "5m") and are parsed
/// and bounds-checked before the plan is created.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutConfigRequest {
    pub total_replicas: i32,
    #[serde(default)]
    pub steps: Option<Vec<i32>>,
    #[serde(default)]
    pub soak: Option<String>,
    #[serde(default)]
    pub tick_interval: Option<String>,
    pub source_endpoint: String,
    pub target_endpoint: String,
    #[serde(default)]
    pub health: Option<HealthConfig>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    #[serde(default)]
    pub routing: Option<RouteConfig>,
}

impl RolloutConfigRequest {
    fn into_config(self) -> Result<RolloutConfig, ConfigError> {
        let defaults = |value: Option<String>, fallback: u64| -> Result<u64, ConfigError> {
            match value {
                Some(text) => Ok(parse_duration(&text)?.as_secs()),
                None => Ok(fallback),
            }
        };

        Ok(RolloutConfig {
            total_replicas: self.total_replicas,
            steps: self.steps.unwrap_or_else(crate::plan::default_steps),
            soak_seconds: defaults(self.soak, 60)?,
            tick_interval_seconds: defaults(self.tick_interval, 10)?,
            source_endpoint: self.source_endpoint,
            target_endpoint: self.target_endpoint,
            health: self.health.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
            routing: self.routing,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolView {
    pub name: String,
    pub version: String,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub health: crate::plan::HealthStatus,
}

impl From<&Pool> for PoolView {
    fn from(pool: &Pool) -> Self {
        PoolView {
            name: pool.name.clone(),
            version: pool.version.clone(),
            desired_replicas: pool.desired_replicas,
            ready_replicas: pool.ready_replicas,
            health: pool.health,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatusResponse {
    pub service_name: String,
    pub strategy: StrategyKind,
    pub status: crate::plan::PlanStatus,
    pub source_weight: i32,
    pub target_weight: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub source: PoolView,
    pub target: PoolView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub last_transition_timestamp: DateTime<Utc>,
}

impl From<&TrafficPlan> for RolloutStatusResponse {
    fn from(plan: &TrafficPlan) -> Self {
        RolloutStatusResponse {
            service_name: plan.service_name.clone(),
            strategy: plan.strategy,
            status: plan.status,
            source_weight: plan.source_weight(),
            target_weight: plan.target_weight,
            step_index: plan.step_index,
            source: PoolView::from(&plan.source),
            target: PoolView::from(&plan.target),
            message: plan.message.clone(),
            failure_reason: plan.failure_reason.clone(),
            last_transition_timestamp: plan.last_transition,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps operator errors onto HTTP statuses
struct ApiError(OperatorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OperatorError::Config(_) => StatusCode::BAD_REQUEST,
            OperatorError::NotFound(_) => StatusCode::NOT_FOUND,
            OperatorError::AlreadyActive(_)
            | OperatorError::Finished(_)
            | OperatorError::PromoteUnsupported(_) => StatusCode::CONFLICT,
            OperatorError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            OperatorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<OperatorError> for ApiError {
    fn from(error: OperatorError) -> Self {
        ApiError(error)
    }
}

async fn start_rollout(
    State(state): State<AppState>,
    Json(request): Json<StartRolloutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let config = request
        .config
        .into_config()
        .map_err(OperatorError::Config)?;

    let plan = state
        .manager
        .start_rollout(StartRollout {
            service_name: request.service_name,
            strategy: request.strategy,
            source_pool: request.source_pool,
            source_version: request.source_version,
            target_pool: request.target_pool,
            target_version: request.target_version,
            config,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RolloutStatusResponse::from(&plan)),
    ))
}

async fn get_rollout(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let plan = state.manager.get_status(&service).await?;
    Ok(Json(RolloutStatusResponse::from(&plan)))
}

async fn abort_rollout(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.abort(&service).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn promote_rollout(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.manager.promote(&service).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Build the full router: operator API plus probes and metrics
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/rollouts", post(start_rollout))
        .route("/rollouts/{service}", get(get_rollout))
        .route("/rollouts/{service}/abort", post(abort_rollout))
        .route("/rollouts/{service}/promote", post(promote_rollout))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(health::metrics))
        .with_state(state)
}

/// Serve the API until the shutdown signal fires
pub async fn run_api_server(
    port: u16,
    state: AppState,
    mut shutdown: ShutdownSignal,
) -> Result<(), std::io::Error> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
