use crate::error::ApiError;
use crate::handlers::upload::parse_session_config;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use pipeline::SourceSpec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct CameraQuery {
    /// `/dev/video<device>`, defaults to 0.
    pub device: Option<u32>,
    pub confidence: Option<String>,
    pub sample_rate: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CameraResponse {
    pub message: String,
    pub session_id: String,
    pub stream_url: String,
    pub source: String,
}

/// Start a live session on a local capture device at the configured size.
pub async fn start_camera(
    State(state): State<AppState>,
    Query(query): Query<CameraQuery>,
) -> Result<Json<CameraResponse>, ApiError> {
    let config = parse_session_config(query.confidence.as_deref(), query.sample_rate.as_deref())?;
    let index = query.device.unwrap_or(0);
    let (width, height) = state.config.capture_size;
    let spec = SourceSpec::Device {
        index,
        width,
        height,
    };

    let session_id = format!("camera-{}", index);
    let controller = state.controller.clone();
    let opener = state.opener.clone();
    let id = session_id.clone();
    let source = tokio::task::spawn_blocking(move || -> Result<String, ApiError> {
        // The device only opens once its current session lets go of it.
        let holds_device = controller
            .current_session()
            .is_some_and(|session| session.source_description() == spec.description());
        if holds_device {
            tracing::info!(device = %spec.description(), "Restarting session on the same device");
            controller.stop();
        }

        let source = opener.open(&spec)?;
        let session = controller.start(id, source, config)?;
        Ok(session.source_description().to_string())
    })
    .await??;

    tracing::info!(session_id = %session_id, source = %source, "Camera session started");

    Ok(Json(CameraResponse {
        message: "Camera detection started".into(),
        session_id,
        stream_url: "/stream".into(),
        source,
    }))
}
