//! REST API handlers for dsedit-server.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use tracing::{info, warn};

use dsedit_core::api::{CreateItemsBody, ListItemsParams};
use dsedit_core::models::{BatchDeleteRequest, BatchUpdateRequest, ItemPatch};
use dsedit_core::DseditError;

use crate::state::AppState;

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/datasets", get(list_datasets))
        .route("/datasets/{dataset}/items", get(list_items).put(create_items))
        .route("/datasets/{dataset}/items/batch", patch(batch_update))
        .route("/datasets/{dataset}/items/delete", post(delete_items))
        .route("/items/{item}", patch(update_item))
        .route("/config", get(get_server_config))
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn error_response(e: DseditError) -> Response {
    let status = match &e {
        DseditError::DatasetNotFound(_) | DseditError::ItemNotFound(_) => StatusCode::NOT_FOUND,
        DseditError::Json(_) | DseditError::Validation(_) | DseditError::InvalidDatasetId(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("Request failed: {}", e);
    }
    (status, e.to_string()).into_response()
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn list_datasets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.list_datasets())
}

async fn list_items(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Query(params): Query<ListItemsParams>,
) -> Response {
    let query = match params.into_query() {
        Ok(q) => q,
        Err(e) => return error_response(e),
    };
    match state.store.list_items(&dataset, &query) {
        Ok(page) => Json(page).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_items(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(body): Json<CreateItemsBody>,
) -> Response {
    match state.store.create_items(&dataset, body.items) {
        Ok(count) => {
            info!(dataset = %dataset, count, "Items created");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn update_item(
    State(state): State<AppState>,
    Path(item): Path<String>,
    Json(item_patch): Json<ItemPatch>,
) -> Response {
    match state.store.update_item(&item, &item_patch) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

async fn batch_update(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(request): Json<BatchUpdateRequest>,
) -> Response {
    match state.store.batch_update(&dataset, &request) {
        Ok(updated) => {
            info!(dataset = %dataset, updated, merge_tags = request.merge_tags, "Items batch-updated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn delete_items(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Json(request): Json<BatchDeleteRequest>,
) -> Response {
    match state.store.delete_items(&dataset, &request) {
        Ok(deleted) => {
            info!(dataset = %dataset, deleted, "Items deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn get_server_config() -> impl IntoResponse {
    Json(json!({"service": "dsedit", "version": env!("CARGO_PKG_VERSION")}))
}
