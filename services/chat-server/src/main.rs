use std::sync::Arc;

use chat_core::{DeliveryService, Hub};
use chat_server::config::Config;
use chat_server::repo::{PgMembershipOracle, PgMessageStore};
use chat_server::state::AppState;
use chat_server::{db, build_router};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .init();

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let store = Arc::new(PgMessageStore::new(pool.clone()));
    let membership = Arc::new(PgMembershipOracle::new(pool.clone()));
    let (hub, hub_handle) = Hub::new(store.clone(), membership.clone());
    tokio::spawn(hub.run());

    let delivery = Arc::new(DeliveryService::new(store, membership, hub_handle.clone()));
    let config = Arc::new(config);
    let state = AppState::new(pool, delivery, hub_handle, config.clone());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %config.bind_addr, "chat server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("chat server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
