use crate::handlers::{camera, control, detections, stream, upload};
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/upload", post(upload::upload))
        .route("/camera", post(camera::start_camera))
        .route("/stream", get(stream::stream_frames))
        .route("/stop", post(control::stop))
        .route("/detections", get(detections::list_detections))
        .route("/detections/:id", get(detections::get_detection))
        .route("/status", get(control::status))
        .route("/health", get(control::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until Ctrl-C, then stop the active session.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.addr;
    let controller = state.controller.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway shutting down");
    tokio::task::spawn_blocking(move || controller.stop()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
