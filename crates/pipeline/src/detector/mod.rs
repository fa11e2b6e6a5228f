use crate::record::RawDetection;
use image::RgbImage;
use std::sync::{Arc, Mutex};

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Object detection model. Given a frame, returns regions scoring at least
/// `confidence_threshold`, in frame pixel coordinates.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
    ) -> anyhow::Result<Vec<RawDetection>>;
}

pub type SharedDetector = Arc<Mutex<dyn Detector>>;

pub fn shared<D: Detector + 'static>(detector: D) -> SharedDetector {
    Arc::new(Mutex::new(detector))
}

/// Reports nothing. Used when no model backend is compiled in or configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn name(&self) -> &str {
        "noop"
    }

    fn detect(&mut self, _frame: &RgbImage, _threshold: f32) -> anyhow::Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_detects_nothing() {
        let detector = shared(NoopDetector);
        let frame = RgbImage::new(4, 4);
        let mut guard = detector.lock().unwrap();
        assert_eq!(guard.name(), "noop");
        assert!(guard.detect(&frame, 0.0).unwrap().is_empty());
    }
}
