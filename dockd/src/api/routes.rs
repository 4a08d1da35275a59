use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use shared::protocol::{ALL_DOCKS_KEY, API_PREFIX, WS_PATH};
use shared::types::{Dock, DockStatus};
use crate::api::ws;
use crate::cache::DockCache;
use crate::mutation::{DockMutator, MutationError};
use crate::store_manager::StoreHandle;
use crate::sync::RegistryHandle;

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub cache: Arc<DockCache>,
    pub registry: RegistryHandle,
    pub mutator: DockMutator,
    pub hash_rx: watch::Receiver<String>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}

/// Error response, rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        tracing::error!("{}: {:#}", context, err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, context)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<MutationError> for ApiError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::NotFound(id) => {
                ApiError::new(StatusCode::NOT_FOUND, format!("Dock {} not found", id))
            }
            MutationError::Store(e) => ApiError::internal("Failed to update dock", e),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/docks", get(list_docks))
        .route("/docks/hash", get(get_hash))
        .route("/docks/:id", get(get_dock).put(update_dock))
        .route("/health", get(health));

    Router::new()
        .route(WS_PATH, get(ws::ws_upgrade))
        .nest(API_PREFIX, api)
        .with_state(state)
}

async fn list_docks(State(state): State<AppState>) -> Result<Json<Vec<Dock>>, ApiError> {
    if let Some(docks) = state.cache.get(ALL_DOCKS_KEY) {
        return Ok(Json(docks));
    }

    let epoch = state.cache.epoch();
    let docks = state
        .store
        .list_all()
        .await
        .map_err(|e| ApiError::internal("Failed to query docks", e))?;
    state.cache.fill(ALL_DOCKS_KEY, docks.clone(), epoch);

    Ok(Json(docks))
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn get_dock(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Dock>, ApiError> {
    let Path(id) = id?;
    state
        .store
        .get_one(id)
        .await
        .map_err(|e| ApiError::internal("Failed to query dock", e))?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Dock {} not found", id)))
}

async fn update_dock(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<Dock>, ApiError> {
    let Path(id) = id?;
    let Json(body) = body?;
    let status: DockStatus = body
        .status
        .parse()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("{}", e)))?;

    let dock = state.mutator.set_status(id, status).await?;
    Ok(Json(dock))
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let connections = state
        .registry
        .connection_count()
        .await
        .map_err(|e| ApiError::internal("Failed to count connections", e))?;

    Ok(Json(HealthResponse {
        status: "OK",
        connections,
    }))
}
