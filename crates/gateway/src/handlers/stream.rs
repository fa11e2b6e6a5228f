use crate::state::AppState;
use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::sync::Arc;

pub const BOUNDARY: &str = "frame";

fn multipart_part(jpeg: &[u8]) -> Vec<u8> {
    let mut part = Vec::with_capacity(jpeg.len() + 96);
    part.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    part.extend_from_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// MJPEG feed of the current session's annotated frames. Ends when that
/// session is stopped or replaced, or finished without producing a frame.
pub async fn stream_frames(State(state): State<AppState>) -> Response {
    let Some(session) = state.controller.current_session() else {
        return (
            StatusCode::OK,
            "No active video feed. Please upload a video first.",
        )
            .into_response();
    };

    let controller = state.controller.clone();
    let interval = state.config.stream_interval;
    tracing::info!(session_id = %session.id(), "Stream client connected");

    let body = stream! {
        let mut ticker = tokio::time::interval(interval);
        let mut last_sent = None;

        loop {
            ticker.tick().await;

            let still_current = controller
                .current_session()
                .is_some_and(|current| Arc::ptr_eq(&current, &session));
            if !still_current {
                tracing::info!(session_id = %session.id(), "Stream ended with its session");
                break;
            }

            let frame = match session.latest_frame() {
                Some(frame) => Some(frame),
                None if session.is_finished() => {
                    tracing::info!(session_id = %session.id(), "Session finished without frames, ending stream");
                    break;
                }
                None => {
                    let controller = controller.clone();
                    tokio::task::spawn_blocking(move || controller.step_once().ok().flatten())
                        .await
                        .ok()
                        .flatten()
                }
            };

            let Some(frame) = frame else { continue };
            if last_sent == Some(frame.frame_number) {
                continue;
            }
            last_sent = Some(frame.frame_number);

            yield Ok::<_, Infallible>(multipart_part(&frame.jpeg));
        }
    };

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
