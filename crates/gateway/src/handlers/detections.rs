use crate::error::ApiError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pipeline::DetectionRecord;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct DetectionsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DetectionView {
    pub id: String,
    pub timestamp: f64,
    pub formatted_time: String,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
    /// `data:image/jpeg;base64,...` crop
    pub image: String,
}

impl From<&DetectionRecord> for DetectionView {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            id: record.id.clone(),
            timestamp: record.timestamp_secs(),
            formatted_time: record.formatted_time(),
            class_name: record.class_name.clone(),
            confidence: record.confidence,
            bbox: record.bbox.as_array(),
            image: format!("data:image/jpeg;base64,{}", STANDARD.encode(&record.crop_jpeg)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DetectionList {
    pub count: usize,
    pub detections: Vec<DetectionView>,
}

pub async fn list_detections(
    State(state): State<AppState>,
    Query(query): Query<DetectionsQuery>,
) -> Result<Json<DetectionList>, ApiError> {
    let records = state
        .controller
        .get_recent(query.limit.unwrap_or(DEFAULT_LIMIT))?;
    let detections: Vec<DetectionView> = records.iter().map(|r| DetectionView::from(r.as_ref())).collect();

    Ok(Json(DetectionList {
        count: detections.len(),
        detections,
    }))
}

pub async fn get_detection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DetectionView>, ApiError> {
    let record = state
        .controller
        .get_by_id(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("Detection {} not found", id)))?;
    Ok(Json(DetectionView::from(record.as_ref())))
}
