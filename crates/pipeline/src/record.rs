use chrono::{DateTime, Utc};
use serde::Serialize;

/// Integer pixel box, `(x1, y1)` top-left and `(x2, y2)` bottom-right (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Truncates float detector coordinates toward zero.
    pub fn from_f32(coords: [f32; 4]) -> Self {
        Self {
            x1: coords[0] as i32,
            y1: coords[1] as i32,
            x2: coords[2] as i32,
            y2: coords[3] as i32,
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Clamp to a `width` x `height` frame. `None` when nothing of the box is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let w = width as i32;
        let h = height as i32;
        let clamped = Self {
            x1: self.x1.min(self.x2).clamp(0, w),
            y1: self.y1.min(self.y2).clamp(0, h),
            x2: self.x2.max(self.x1).clamp(0, w),
            y2: self.y2.max(self.y1).clamp(0, h),
        };
        (!clamped.is_empty()).then_some(clamped)
    }

    pub fn as_array(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// One detector output, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub class_name: String,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(bbox: [f32; 4], class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// A stored detection with its JPEG crop. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub crop_jpeg: Vec<u8>,
}

impl DetectionRecord {
    /// `<capture unix millis>_<frame number>_<position in the frame's batch>`.
    /// Frame numbers never repeat within a session, so neither do ids.
    pub fn make_id(captured_at: DateTime<Utc>, frame_number: u64, index: usize) -> String {
        format!("{}_{}_{}", captured_at.timestamp_millis(), frame_number, index)
    }

    pub fn formatted_time(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp.timestamp_millis() as f64 / 1000.0
    }
}
