//! YOLO-style ONNX models (single `images` input, `output0` of shape
//! `[1, 4 + classes, anchors]` with cxcywh boxes in input pixels).

use super::Detector;
use crate::record::RawDetection;
use anyhow::Context;
use common::span;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array, ArrayViewD, IxDyn};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::path::Path;

const LETTERBOX_COLOR: u8 = 114;
const NMS_IOU_THRESHOLD: f32 = 0.45;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub orig_width: u32,
    pub orig_height: u32,
}

pub struct YoloDetector {
    session: Session,
    classes: Vec<String>,
    input_size: u32,
}

impl YoloDetector {
    pub fn load(path: &Path, classes: Vec<String>, input_size: u32) -> anyhow::Result<Self> {
        let _ = ort::init().commit();

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            model = %path.display(),
            classes = classes.len(),
            input_size,
            "Detection model loaded"
        );

        Ok(Self {
            session,
            classes,
            input_size,
        })
    }

    fn preprocess(&self, frame: &RgbImage) -> (Array<f32, IxDyn>, Letterbox) {
        let _s = span!("preprocess");
        let size = self.input_size;
        let (width, height) = frame.dimensions();
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        let offset_x = (size - new_w) / 2;
        let offset_y = (size - new_h) / 2;

        let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_COLOR; 3]));
        imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);

        let side = size as usize;
        let mut input = Array::zeros(IxDyn(&[1, 3, side, side]));
        for (x, y, pixel) in canvas.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }

        let letterbox = Letterbox {
            scale,
            offset_x: offset_x as f32,
            offset_y: offset_y as f32,
            orig_width: width,
            orig_height: height,
        };
        (input, letterbox)
    }

    fn class_name(&self, class_id: usize) -> String {
        self.classes
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

impl Detector for YoloDetector {
    fn name(&self) -> &str {
        "yolo-onnx"
    }

    fn detect(
        &mut self,
        frame: &RgbImage,
        confidence_threshold: f32,
    ) -> anyhow::Result<Vec<RawDetection>> {
        let _s = span!("detect");
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self
            .session
            .run(ort::inputs!["images" => TensorRef::from_array_view(input.view())?])?;
        let output = outputs["output0"].try_extract_array::<f32>()?;

        let candidates = decode_output(&output, &letterbox, confidence_threshold)?;
        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD)
            .into_iter()
            .map(|c| RawDetection::new(c.bbox, self.class_name(c.class_id), c.confidence))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub confidence: f32,
}

/// Turn `[1, 4 + classes, anchors]` into frame-space candidates above `threshold`.
pub(crate) fn decode_output(
    output: &ArrayViewD<f32>,
    letterbox: &Letterbox,
    threshold: f32,
) -> anyhow::Result<Vec<Candidate>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] <= 4 {
        anyhow::bail!("Unexpected model output shape {:?}", shape);
    }
    let num_classes = shape[1] - 4;
    let anchors = shape[2];

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (0..num_classes)
            .map(|c| (c, output[[0, 4 + c, i]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        let unletterbox = |v: f32, offset: f32, max: u32| ((v - offset) / letterbox.scale).clamp(0.0, max as f32);
        let bbox = [
            unletterbox(cx - w / 2.0, letterbox.offset_x, letterbox.orig_width),
            unletterbox(cy - h / 2.0, letterbox.offset_y, letterbox.orig_height),
            unletterbox(cx + w / 2.0, letterbox.offset_x, letterbox.orig_width),
            unletterbox(cy + h / 2.0, letterbox.offset_y, letterbox.orig_height),
        ];

        candidates.push(Candidate {
            bbox,
            class_id,
            confidence,
        });
    }
    Ok(candidates)
}

/// Greedy per-class NMS, highest confidence first.
pub(crate) fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - intersection;
    if union <= 0.0 { 0.0 } else { intersection / union }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            orig_width: 640,
            orig_height: 640,
        }
    }

    #[test]
    fn decodes_best_class_per_anchor() {
        // 2 classes, 2 anchors
        let mut output = Array3::<f32>::zeros((1, 6, 2));
        for (row, v) in [100.0, 100.0, 20.0, 40.0, 0.1, 0.8].iter().enumerate() {
            output[[0, row, 0]] = *v;
        }
        output[[0, 4, 1]] = 0.2;

        let output = output.into_dyn();
        let candidates = decode_output(&output.view(), &identity_letterbox(), 0.5).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_id, 1);
        assert_eq!(candidates[0].bbox, [90.0, 80.0, 110.0, 120.0]);
    }

    #[test]
    fn undoes_letterbox_offset_and_scale() {
        let mut output = Array3::<f32>::zeros((1, 5, 1));
        output[[0, 0, 0]] = 120.0;
        output[[0, 1, 0]] = 120.0;
        output[[0, 2, 0]] = 40.0;
        output[[0, 3, 0]] = 40.0;
        output[[0, 4, 0]] = 0.9;

        let letterbox = Letterbox {
            scale: 0.5,
            offset_x: 0.0,
            offset_y: 20.0,
            orig_width: 1280,
            orig_height: 720,
        };
        let output = output.into_dyn();
        let candidates = decode_output(&output.view(), &letterbox, 0.5).unwrap();
        assert_eq!(candidates[0].bbox, [200.0, 160.0, 280.0, 240.0]);
    }

    #[test]
    fn rejects_malformed_output() {
        let output = Array3::<f32>::zeros((1, 4, 3)).into_dyn();
        assert!(decode_output(&output.view(), &identity_letterbox(), 0.5).is_err());
    }

    #[test]
    fn nms_keeps_best_overlapping_box_per_class() {
        let candidates = vec![
            Candidate { bbox: [0.0, 0.0, 10.0, 10.0], class_id: 0, confidence: 0.7 },
            Candidate { bbox: [1.0, 1.0, 11.0, 11.0], class_id: 0, confidence: 0.9 },
            Candidate { bbox: [1.0, 1.0, 11.0, 11.0], class_id: 1, confidence: 0.6 },
            Candidate { bbox: [50.0, 50.0, 60.0, 60.0], class_id: 0, confidence: 0.5 },
        ];

        let kept = non_max_suppression(candidates, 0.45);
        let confidences: Vec<f32> = kept.iter().map(|c| c.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.6, 0.5]);
    }
}
