use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::params::{parse_range, parse_time, ParamError, RangeQuery};
use crate::auth::{AccessDescriptor, AuthOperator, Identity, Operator, OperatorError, Role};
use crate::data::{DataType, Datapoint, StreamPath};
use crate::database::Database;
use crate::storage::StreamConfig;

/// Application state shared across handlers
pub struct AppState {
    pub db: Arc<Database>,
    pub inserts: AtomicU64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            inserts: AtomicU64::new(0),
            started_at: chrono::Utc::now(),
        }
    }

    /// Operator for the caller named by the `Authorization: Bearer` header
    fn caller(&self, headers: &HeaderMap) -> Result<AuthOperator, ApiError> {
        let key = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        self.db
            .authenticate(key)
            .ok_or_else(|| ApiError::Unauthorized("Unknown API key".into()))
    }

    fn admin(&self, headers: &HeaderMap) -> Result<AuthOperator, ApiError> {
        let op = self.caller(headers)?;
        if !op.identity().is_admin() {
            return Err(ApiError::Forbidden(format!("{} is not an admin", op.identity())));
        }
        Ok(op)
    }
}

fn stream_path((owner, device, stream): &(String, String, String)) -> String {
    format!("{}/{}/{}", owner, device, stream)
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Stream Data
// ============================================================================

pub async fn stream_length(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<usize>, ApiError> {
    let op = state.caller(&headers)?;
    Ok(Json(op.length(&stream_path(&path))?))
}

#[derive(Serialize)]
pub struct InsertResponse {
    pub inserted: usize,
}

/// POST: append, rejecting out-of-order timestamps
pub async fn insert_data(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InsertResponse>, ApiError> {
    write_stream(&state, &path, &headers, &body, false)
}

/// PUT: append, restamping out-of-order timestamps
pub async fn restamp_data(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<InsertResponse>, ApiError> {
    write_stream(&state, &path, &headers, &body, true)
}

fn write_stream(
    state: &AppState,
    path: &(String, String, String),
    headers: &HeaderMap,
    body: &[u8],
    restamp: bool,
) -> Result<Json<InsertResponse>, ApiError> {
    let op = state.caller(headers)?;
    let datapoints: Vec<Datapoint> =
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let path = stream_path(path);
    let inserted = op.insert_stream(&path, datapoints, restamp)?;
    state.inserts.fetch_add(inserted as u64, Ordering::Relaxed);

    tracing::debug!(
        "{} {}: insert {}{}",
        op.identity(),
        path,
        inserted,
        if restamp { " (restamp)" } else { "" }
    );
    Ok(Json(InsertResponse { inserted }))
}

pub async fn stream_range(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Datapoint>>, ApiError> {
    let op = state.caller(&headers)?;
    let range = parse_range(&params)?;
    let transform = params.get("transform").map(String::as_str).unwrap_or("");
    let path = stream_path(&path);

    tracing::debug!("{} {}: {}", op.identity(), path, range);

    let datapoints = match range {
        RangeQuery::Index { i1, i2 } => op.index_range(&path, i1, i2, transform)?,
        RangeQuery::Time { t1, t2, limit } => op.time_range(&path, t1, t2, limit, transform)?,
    };
    Ok(Json(datapoints))
}

pub async fn time_to_index(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<usize>, ApiError> {
    let op = state.caller(&headers)?;
    let t = parse_time(&params)?;
    let path = stream_path(&path);

    tracing::debug!("{} {}: time2index t={}", op.identity(), path, t);
    Ok(Json(op.time_to_index(&path, t)?))
}

// ============================================================================
// Stream Management
// ============================================================================

#[derive(Serialize)]
pub struct StreamInfo {
    pub path: String,
    pub schema: DataType,
    pub length: usize,
    pub description: String,
}

pub async fn list_streams(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<StreamInfo>>, ApiError> {
    let op = state.caller(&headers)?;
    let streams = op
        .list_readable()
        .into_iter()
        .map(|s| StreamInfo {
            path: s.path().to_string(),
            schema: s.config.schema,
            length: s.len(),
            description: s.config.description.clone(),
        })
        .collect();
    Ok(Json(streams))
}

#[derive(Deserialize, Default)]
pub struct CreateStreamRequest {
    #[serde(default)]
    pub schema: Option<DataType>,
    #[serde(default)]
    pub access: Option<AccessDescriptor>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Serialize)]
pub struct CreateStreamResponse {
    pub path: String,
    pub created: bool,
}

pub async fn create_stream(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateStreamResponse>), ApiError> {
    let op = state.caller(&headers)?;
    let request: CreateStreamRequest = if body.is_empty() {
        CreateStreamRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let (owner, device, stream) = path;
    let path = StreamPath::new(owner, device, stream)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mut config = StreamConfig::new(path.clone());
    if let Some(schema) = request.schema {
        config = config.with_schema(schema);
    }
    if let Some(access) = request.access {
        config = config.with_access(access);
    }
    if let Some(description) = request.description {
        config = config.with_description(description);
    }

    op.create_stream(config)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateStreamResponse {
            path: path.to_string(),
            created: true,
        }),
    ))
}

pub async fn delete_stream(
    State(state): State<Arc<AppState>>,
    Path(path): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let op = state.caller(&headers)?;
    let path = stream_path(&path);
    op.delete_stream(&path)?;

    Ok(Json(serde_json::json!({ "deleted": path })))
}

// ============================================================================
// Users
// ============================================================================

#[derive(Deserialize)]
pub struct AddUserRequest {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub role: Role,
}

pub async fn add_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AddUserRequest>,
) -> Result<(StatusCode, Json<Identity>), ApiError> {
    state.admin(&headers)?;

    if request.key.trim().is_empty() || request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("key and name must not be empty".into()));
    }

    let identity = Identity {
        name: request.name,
        device: request.device,
        role: request.role,
    };
    let added = state
        .db
        .users()
        .add(request.key, identity.clone())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !added {
        return Err(ApiError::Conflict("API key already registered".into()));
    }

    tracing::info!("Registered {} ({:?})", identity, identity.role);
    Ok((StatusCode::CREATED, Json(identity)))
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub streams: usize,
    pub total_datapoints: usize,
    pub inserts: u64,
    pub started_at: String,
    pub uptime_secs: i64,
    pub transform_cache: crate::query::CacheStats,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatsResponse>, ApiError> {
    state.admin(&headers)?;
    let registry = state.db.registry();

    Ok(Json(StatsResponse {
        streams: registry.stream_count(),
        total_datapoints: registry.total_datapoints(),
        inserts: state.inserts.load(Ordering::Relaxed),
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
        transform_cache: state.db.operator().transforms().stats(),
    }))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<OperatorError> for ApiError {
    fn from(e: OperatorError) -> Self {
        match e {
            OperatorError::BadRequest(msg) => ApiError::BadRequest(msg),
            OperatorError::NotFound(msg) => ApiError::NotFound(msg),
            OperatorError::Forbidden(msg) => ApiError::Forbidden(msg),
            OperatorError::Conflict(msg) => ApiError::Conflict(msg),
            OperatorError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ParamError> for ApiError {
    fn from(e: ParamError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
