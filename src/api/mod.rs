//! HTTP API for health checks, state queries and operations
//!
//! Reads are open. `POST /rpc` runs an operation as the address bound to
//! the request's bearer token; the role checks then apply to that address.

mod auth;

pub use auth::Credentials;

use crate::config::ApiConfig;
use crate::coordination::{Command, CommandOutput, CoordinationEngine};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::fees::FeeInfo;
use crate::limiter::{LimitKind, LimitParams};
use crate::registry::{AsyncRequest, RegistryStats, TimeoutRequest};
use crate::state::JournalStats;

use alloy_primitives::{Address, Bytes, B256, U256};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CoordinationEngine>,
    pub credentials: Arc<Credentials>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(engine: Arc<CoordinationEngine>, credentials: Credentials) -> Self {
        Self {
            engine,
            credentials: Arc::new(credentials),
            started_at: Instant::now(),
        }
    }
}

/// Routes served by the API
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/events", get(get_request_events))
        .route("/timeouts/:id", get(get_timeout))
        .route("/limits/:gateway/:kind", get(get_limit))
        .route("/fees/:chain/:gateway/:token", get(get_fees))
        .route("/stats", get(get_stats))
        .route("/rpc", post(rpc))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // browsers may read state; operations are not cross-origin
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([Method::GET]),
                ),
        )
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, engine: Arc<CoordinationEngine>) -> CoordinatorResult<()> {
    let credentials = Credentials::new(&config.credentials);
    info!("Loaded {} API credentials", credentials.len());
    let app = router(AppState::new(engine, credentials));

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| CoordinatorError::Internal(format!("API server error: {}", e)))?;

    Ok(())
}

/// Error rendered as a JSON body with a status matching its kind
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        ApiError(CoordinatorError::Config(message))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            CoordinatorError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CoordinatorError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            CoordinatorError::RequestNotFound(_)
            | CoordinatorError::TimeoutNotFound(_)
            | CoordinatorError::FeesRecordNotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoordinatorError::RequestAlreadyAttested(_)
            | CoordinatorError::TimeoutAlreadyResolved(_)
            | CoordinatorError::AppGatewayAlreadyCalled(_)
            | CoordinatorError::FeesAlreadyBlocked(_) => StatusCode::CONFLICT,
            CoordinatorError::CallFailed { .. } => StatusCode::BAD_GATEWAY,
            CoordinatorError::Database(_) | CoordinatorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error: self.0.code(),
            message: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_id(raw: &str) -> Result<B256, ApiError> {
    B256::from_str(raw).map_err(|e| ApiError::bad_request(format!("Invalid id {}: {}", raw, e)))
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    Address::from_str(raw)
        .map_err(|e| ApiError::bad_request(format!("Invalid address {}: {}", raw, e)))
}

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    crate::metrics::record_health_check();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.engine.instance_id().to_string(),
    })
}

/// Readiness check - verify the journal is reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let journal_ok = state.engine.sink().health_check().await.is_ok();
    if journal_ok {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                journal: true,
            }),
        )
    } else {
        crate::metrics::record_health_check_failure();
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                journal: false,
            }),
        )
    }
}

/// Get coordinator status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let (now, registry, max_timeout_delay_secs, expiry_time_secs) = state
        .engine
        .inspect(|r| (r.now(), r.stats(), r.max_timeout_delay(), r.expiry_time()))
        .await;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.engine.instance_id().to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        now,
        max_timeout_delay_secs,
        expiry_time_secs,
        registry,
    })
}

/// Get a stored request and its attestation
async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RequestResponse>, ApiError> {
    let request_id = parse_id(&id)?;
    let response = state
        .engine
        .inspect(|r| {
            r.request(&request_id).map(|request| RequestResponse {
                request_id,
                request: request.clone(),
                signature: r.signature(&request_id).cloned(),
                executed: r.is_executed(request.origin_gateway, &request.async_id),
            })
        })
        .await
        .ok_or(CoordinatorError::RequestNotFound(request_id))?;
    Ok(Json(response))
}

/// Get journaled events for a request
async fn get_request_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = parse_id(&id)?;
    let events = state.engine.sink().events_for(request_id).await?;
    Ok(Json(events))
}

async fn get_timeout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TimeoutRequest>, ApiError> {
    let timeout_id = parse_id(&id)?;
    let timeout = state
        .engine
        .inspect(|r| r.timeout(&timeout_id).cloned())
        .await
        .ok_or(CoordinatorError::TimeoutNotFound(timeout_id))?;
    Ok(Json(timeout))
}

/// Get the current rate limit of an app gateway
async fn get_limit(
    State(state): State<AppState>,
    Path((gateway, kind)): Path<(String, String)>,
) -> Result<Json<LimitResponse>, ApiError> {
    let app_gateway = parse_address(&gateway)?;
    let kind = LimitKind::from_str(&kind)?;
    let (current, params) = state
        .engine
        .inspect(|r| (r.current_limit(kind, app_gateway), r.limit_params(kind, app_gateway)))
        .await;

    Ok(Json(LimitResponse {
        kind,
        app_gateway,
        current_limit: current?.to_string(),
        params,
    }))
}

/// Get the fee balance of an app gateway
async fn get_fees(
    State(state): State<AppState>,
    Path((chain, gateway, token)): Path<(u32, String, String)>,
) -> Result<Json<FeesResponse>, ApiError> {
    let app_gateway = parse_address(&gateway)?;
    let token = parse_address(&token)?;
    let info = state
        .engine
        .inspect(|r| r.fee_info(chain, app_gateway, token))
        .await;

    Ok(Json(FeesResponse {
        chain_slug: chain,
        app_gateway,
        token,
        available: info.available(),
        balance: info,
    }))
}

/// Get registry and journal statistics
async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let registry = state.engine.inspect(|r| r.stats()).await;
    let journal = state.engine.sink().stats().await?;
    Ok(Json(StatsResponse { registry, journal }))
}

/// Run one operation as the authenticated caller
async fn rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(command): Json<Command>,
) -> Result<Json<RpcResponse>, ApiError> {
    let caller = state.credentials.authenticate(&headers)?;
    debug!("Operation {} from {}", command.name(), caller);
    let result = state.engine.execute(caller, command).await?;
    Ok(Json(RpcResponse { result }))
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    instance_id: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    journal: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    instance_id: String,
    uptime_seconds: u64,
    now: u64,
    max_timeout_delay_secs: u64,
    expiry_time_secs: u64,
    registry: RegistryStats,
}

#[derive(Serialize)]
struct RequestResponse {
    request_id: B256,
    request: AsyncRequest,
    signature: Option<Bytes>,
    executed: bool,
}

#[derive(Serialize)]
struct LimitResponse {
    kind: LimitKind,
    app_gateway: Address,
    /// Fixed point, as a decimal string
    current_limit: String,
    params: LimitParams,
}

#[derive(Serialize)]
struct FeesResponse {
    chain_slug: u32,
    app_gateway: Address,
    token: Address,
    balance: FeeInfo,
    available: U256,
}

#[derive(Serialize)]
struct StatsResponse {
    registry: RegistryStats,
    journal: JournalStats,
}

#[derive(Serialize)]
struct RpcResponse {
    result: CommandOutput,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    retryable: bool,
}
