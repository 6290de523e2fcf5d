//! HTTP server lifecycle: bind, spawn the axum task, return a handle with
//! a shutdown channel.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::router::api_router;
use crate::core_state::CoreState;

// ═══════════════════════════════════════════════════════════
// Public types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("Failed to read bound address: {0}")]
    LocalAddr(std::io::Error),
}

/// Metadata for a running server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSession {
    pub session_id: String,
    pub server_addr: String,
    pub port: u16,
    pub started_at: String,
}

/// Handle to a running API server.
pub struct ApiServer {
    pub session: ApiSession,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ApiServer {
    /// Signal graceful shutdown. In-flight requests are allowed to finish.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
    }

    /// Wait for the server task to exit.
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("API server task failed: {e}");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Server lifecycle
// ═══════════════════════════════════════════════════════════

/// Bind `addr` (port 0 picks an ephemeral port) and serve `api_router`
/// in a background task.
pub async fn start_api_server(
    core: Arc<CoreState>,
    addr: SocketAddr,
) -> Result<ApiServer, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

    let app = api_router(core);

    let session = ApiSession {
        session_id: Uuid::new_v4().to_string(),
        server_addr: addr.to_string(),
        port: addr.port(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
        {
            tracing::error!("API server error: {e}");
        }

        tracing::info!("API server stopped");
    });

    Ok(ApiServer {
        session,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
