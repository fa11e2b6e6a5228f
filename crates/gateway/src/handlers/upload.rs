use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Multipart, State};
use pipeline::{SessionConfig, SourceSpec};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

pub const ALLOWED_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "webm"];

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub upload_id: String,
    pub stream_url: String,
    pub filename: String,
}

/// Lowercased extension of `filename` if it is an accepted video type.
pub fn allowed_extension(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Blank or missing fields take the session defaults.
pub fn parse_session_config(
    confidence: Option<&str>,
    sample_rate: Option<&str>,
) -> Result<SessionConfig, ApiError> {
    let defaults = SessionConfig::default();

    let confidence_threshold = match confidence.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<f32>()
            .map_err(|_| ApiError::BadRequest(format!("confidence must be a number, got {:?}", raw)))?,
        None => defaults.confidence_threshold,
    };
    let sample_rate = match sample_rate.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ApiError::BadRequest(format!("sample_rate must be a positive integer, got {:?}", raw)))?,
        None => defaults.sample_rate,
    };

    let config = SessionConfig {
        confidence_threshold,
        sample_rate,
    };
    config.validate()?;
    Ok(config)
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file = None;
    let mut confidence = None;
    let mut sample_rate = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                file = Some((filename, data));
            }
            "confidence" => confidence = Some(field.text().await?),
            "sample_rate" => sample_rate = Some(field.text().await?),
            _ => {}
        }
    }

    let (filename, data) = file.ok_or_else(|| ApiError::BadRequest("No file part".into()))?;
    if filename.is_empty() {
        return Err(ApiError::BadRequest("No selected file".into()));
    }
    let ext = allowed_extension(&filename).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "File type not allowed, expected one of: {}",
            ALLOWED_EXTENSIONS.join(", ")
        ))
    })?;
    let config = parse_session_config(confidence.as_deref(), sample_rate.as_deref())?;

    let upload_id = Uuid::new_v4().to_string();
    let upload_dir = state.config.upload_dir.clone();
    tokio::fs::create_dir_all(&upload_dir).await?;
    let path = upload_dir.join(format!("{}.{}", upload_id, ext));
    tokio::fs::write(&path, &data).await?;

    tracing::info!(
        upload_id = %upload_id,
        filename = %filename,
        bytes = data.len(),
        confidence = config.confidence_threshold,
        sample_rate = config.sample_rate,
        "Video uploaded"
    );

    let controller = state.controller.clone();
    let opener = state.opener.clone();
    let session_id = upload_id.clone();
    let spec = SourceSpec::File(path.clone());
    let started = tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let source = opener.open(&spec)?;
        controller.start(session_id, source, config)?;
        Ok(())
    })
    .await?;

    if let Err(e) = started {
        if let Err(remove_err) = tokio::fs::remove_file(&path).await {
            tracing::warn!(path = %path.display(), error = %remove_err, "Failed to remove rejected upload");
        }
        return Err(e);
    }

    Ok(Json(UploadResponse {
        message: "Video uploaded, detection started".into(),
        upload_id,
        stream_url: "/stream".into(),
        filename,
    }))
}
