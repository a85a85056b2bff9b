pub mod auth;
pub mod config;
pub mod db;
pub mod http;
pub mod repo;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_gateway_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route(
            "/v1/users/:id/messages",
            post(http::messages::send_p2p).get(http::messages::p2p_history),
        )
        .route(
            "/v1/groups/:id/messages",
            post(http::messages::send_group).get(http::messages::group_history),
        )
        .route("/v1/chats", get(http::messages::recent_conversations))
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
