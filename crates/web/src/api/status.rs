//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use kyso_core::merge::{MergeHead, StudyLayout};

use super::AppError;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: String,
    study_root: String,
    merge_head: Option<MergeHead>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/health", get(health_check))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, AppError> {
    let merge_head = MergeHead::read(&StudyLayout::new(&state.root))?;
    Ok(Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        study_root: state.root.display().to_string(),
        merge_head,
    }))
}
