use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use desk_core::orchestrator::Conversation;
use desk_memory::{KnowledgeIndex, SessionMemoryStore};
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::indexing::IndexJob;
use crate::router::build_router;

/// Long-lived components shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub(crate) conversation: Arc<dyn Conversation>,
    pub(crate) index: Arc<KnowledgeIndex>,
    pub(crate) memory: Arc<SessionMemoryStore>,
    pub(crate) indexer: Arc<IndexJob>,
    pub(crate) started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(
        conversation: Arc<dyn Conversation>,
        index: Arc<KnowledgeIndex>,
        memory: Arc<SessionMemoryStore>,
        indexer: Arc<IndexJob>,
    ) -> Self {
        Self {
            conversation,
            index,
            memory,
            indexer,
            started_at: Instant::now(),
        }
    }
}

pub struct GatewayServer {
    addr: SocketAddr,
    max_body_size: usize,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(bind: &str, port: u16, state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from(([127, 0, 0, 1], port))
        });

        if bind == "0.0.0.0" {
            tracing::warn!("gateway binding to 0.0.0.0, reachable from other hosts");
        }

        Self {
            addr,
            max_body_size: 1_048_576,
            state,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Start the HTTP and WebSocket server and run until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal I/O error.
    pub async fn serve(self) -> Result<(), GatewayError> {
        let router = build_router(self.state, self.max_body_size);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::Bind(self.addr.to_string(), e))?;
        tracing::info!("gateway listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow_and_update() {
                if shutdown_rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            tracing::info!("gateway shutting down");
        })
        .await
        .map_err(|e| GatewayError::Server(format!("{e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::test_state;

    #[test]
    fn server_builder_chain() {
        let (_stx, srx) = watch::channel(false);
        let server =
            GatewayServer::new("127.0.0.1", 8090, test_state().0, srx).with_max_body_size(512);
        assert_eq!(server.max_body_size, 512);
        assert_eq!(server.addr.port(), 8090);
    }

    #[test]
    fn server_invalid_bind_fallback() {
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("not_an_ip", 9999, test_state().0, srx);
        assert_eq!(server.addr, SocketAddr::from(([127, 0, 0, 1], 9999)));
    }

    #[tokio::test]
    async fn serve_reports_bind_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("127.0.0.1", port, test_state().0, srx);
        assert!(matches!(server.serve().await, Err(GatewayError::Bind(..))));
    }
}
