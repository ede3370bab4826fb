use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::hub::{run_hub, HubCommand, OutboundFrame};
use crate::ws::{ws_handler, AppState};

/// Spawn the hub and build the HTTP app around it: `/ws` for presence,
/// everything else served from `static_dir`. Must be called inside a
/// tokio runtime.
pub fn build_app(config: &ServerConfig) -> Router {
    let (hub_tx, hub_rx) = mpsc::channel::<HubCommand>(config.command_capacity);
    let (broadcast_tx, _) = broadcast::channel::<Arc<OutboundFrame>>(config.broadcast_capacity);

    let hub_config = config.clone();
    let bc_tx = broadcast_tx.clone();
    tokio::spawn(async move {
        run_hub(hub_rx, bc_tx, hub_config).await;
    });

    let app_state = AppState {
        hub_tx,
        broadcast_tx,
        connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
        max_message_bytes: config.max_message_bytes,
        max_parse_errors: config.max_parse_errors,
    };

    Router::new()
        .route("/ws", get(ws_handler))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
