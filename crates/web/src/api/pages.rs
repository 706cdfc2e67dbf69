//! HTML pages.

use std::sync::Arc;

use axum::extract::{Form, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, Redirect};
use axum::routing::{get, post};
use axum::Router;

use kyso_core::merge::{file_diff, list_conflicts, resolve_file, MergeHead, StudyLayout};

use super::conflicts::{FileQuery, ResolveRequest};
use super::AppError;
use crate::{html, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/diff", get(diff))
        .route("/resolve", post(resolve_form))
}

async fn index(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let root = state.root.clone();
    let page = tokio::task::spawn_blocking(move || -> Result<String, AppError> {
        let head = MergeHead::read(&StudyLayout::new(&root))?;
        let entries = list_conflicts(&root)?;
        Ok(html::conflicts_page(
            head.as_ref().map(|h| h.version_sha.as_str()),
            &entries,
        ))
    })
    .await??;
    Ok(Html(page))
}

async fn diff(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
) -> Result<Html<String>, AppError> {
    let root = state.root.clone();
    let diff = tokio::task::spawn_blocking(move || file_diff(&root, &query.file)).await??;
    Ok(Html(html::diff_page(&diff)))
}

async fn resolve_form(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<ResolveRequest>,
) -> Result<Redirect, AppError> {
    require_same_origin(&headers)?;
    let _guard = state.write_lock.lock().await;
    let root = state.root.clone();
    let ResolveRequest { file, take } = form;
    tokio::task::spawn_blocking(move || resolve_file(&root, &file, take)).await??;
    Ok(Redirect::to("/"))
}

/// Reject form posts submitted from another site.
///
/// Browsers attach `Origin` (and `Sec-Fetch-Site`) to cross-site form posts;
/// the origin must name the host this server was reached on.
fn require_same_origin(headers: &HeaderMap) -> Result<(), AppError> {
    let value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(site) = value(header::HeaderName::from_static("sec-fetch-site")) {
        if site != "same-origin" && site != "none" {
            return Err(AppError::Forbidden(format!("cross-site request ({})", site)));
        }
    }

    let Some(origin) = value(header::ORIGIN) else {
        return Ok(());
    };
    let origin_host = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"));
    match (origin_host, value(header::HOST)) {
        (Some(origin_host), Some(host)) if origin_host == host => Ok(()),
        _ => Err(AppError::Forbidden(format!("origin {} not allowed", origin))),
    }
}
