//! Conflict API endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use kyso_core::merge::{file_diff, list_conflicts, resolve_file, ConflictEntry, FileDiff, Side};

use super::AppError;
use crate::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FileQuery {
    pub file: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub file: String,
    pub take: Side,
}

#[derive(Serialize)]
struct ConflictListItem {
    name: String,
    kind: String,
    indicator: &'static str,
}

impl From<ConflictEntry> for ConflictListItem {
    fn from(entry: ConflictEntry) -> Self {
        Self {
            indicator: entry.kind.indicator(),
            kind: entry.kind.to_string(),
            name: entry.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/conflicts", get(get_conflicts))
        .route("/api/diff", get(get_diff))
        .route("/api/resolve", post(post_resolve))
}

async fn current_conflicts(state: &AppState) -> Result<Vec<ConflictListItem>, AppError> {
    let root = state.root.clone();
    let entries = tokio::task::spawn_blocking(move || list_conflicts(&root)).await??;
    Ok(entries.into_iter().map(ConflictListItem::from).collect())
}

async fn get_conflicts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConflictListItem>>, AppError> {
    Ok(Json(current_conflicts(&state).await?))
}

async fn get_diff(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
) -> Result<Json<FileDiff>, AppError> {
    let root = state.root.clone();
    let diff = tokio::task::spawn_blocking(move || file_diff(&root, &query.file)).await??;
    Ok(Json(diff))
}

/// Take one side for a file and return the conflicts that remain.
async fn post_resolve(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Vec<ConflictListItem>>, AppError> {
    if body.file.is_empty() {
        return Err(AppError::BadRequest("'file' must not be empty".into()));
    }

    let _guard = state.write_lock.lock().await;
    let root = state.root.clone();
    let ResolveRequest { file, take } = body;
    tokio::task::spawn_blocking(move || resolve_file(&root, &file, take)).await??;

    Ok(Json(current_conflicts(&state).await?))
}
