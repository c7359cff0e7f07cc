use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    clear_session_handler, health_handler, index_status_handler, root_handler, search_handler,
    session_messages_handler, start_index_handler,
};
use super::server::AppState;
use super::ws::ws_handler;

/// All HTTP and WebSocket routes.
///
/// `/ws` reads the peer address, so serve with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(state: AppState, max_body_size: usize) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/search", get(search_handler))
        .route("/index", post(start_index_handler))
        .route("/index/status", get(index_status_handler))
        .route("/sessions/{id}", delete(clear_session_handler))
        .route("/sessions/{id}/messages", get(session_messages_handler))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
