//! kyso merge web GUI.
//!
//! Provides an Axum-based HTTP server bound to localhost with:
//! - An HTML conflict list and side-by-side diff pages
//! - A small JSON API to list conflicts, fetch diffs and resolve files
//!
//! The server works directly on a study directory; there is no state beyond
//! the files under `<root>/.kyso`.

pub mod api;
pub mod html;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state accessible from all handlers.
pub struct AppState {
    /// Root of the study being merged.
    pub root: PathBuf,
    /// Serializes working-tree writes.
    pub write_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::pages::routes())
        .merge(api::conflicts::routes())
        .merge(api::status::routes())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            state: AppState::new(root),
        }
    }

    /// Bind `listen_addr`. Port 0 picks a free port.
    pub async fn bind(self, listen_addr: &str) -> anyhow::Result<BoundServer> {
        let addr: SocketAddr = listen_addr.parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(BoundServer {
            listener,
            app: router(self.state),
        })
    }
}

/// A server whose socket is bound but not yet serving.
pub struct BoundServer {
    listener: tokio::net::TcpListener,
    app: Router,
}

impl BoundServer {
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve requests until ctrl-c.
    pub async fn serve(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "starting merge web server");
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutting down merge web server");
            })
            .await?;
        Ok(())
    }
}
