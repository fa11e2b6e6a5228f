//! One detection session: a frame source driven through
//! detect → annotate → store → notify until it is exhausted or cancelled.

use crate::annotate::{annotate, crop, encode_jpeg, label_text};
use crate::detector::SharedDetector;
use crate::metrics::PipelineMetrics;
use crate::notify::NotificationDispatcher;
use crate::record::{BoundingBox, DetectionRecord};
use crate::source::{FrameSource, SourceError};
use crate::store::{DEFAULT_HISTORY_CAPACITY, DetectionStore};
use chrono::{DateTime, Utc};
use image::ImageError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    #[error("video source {0} is not ready")]
    SourceNotReady(String),

    #[error("no active detection session")]
    NoActiveSession,

    #[error("failed to spawn inference worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Per-session detection parameters, fixed for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub confidence_threshold: f32,
    /// Run detection on every `sample_rate`-th frame.
    pub sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            sample_rate: 1,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sample_rate == 0 {
            return Err(SessionError::InvalidConfig(
                "sample_rate must be a positive integer".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SessionError::InvalidConfig(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    /// `frame_counter` is 1-based: the first pulled frame is frame 1.
    pub fn should_detect(&self, frame_counter: u64) -> bool {
        frame_counter % u64::from(self.sample_rate.max(1)) == 0
    }
}

/// Process-level loop tuning.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub frame_interval: Duration,
    pub stop_timeout: Duration,
    pub history_capacity: usize,
    pub jpeg_quality: u8,
    /// Consecutive source read errors after which the stream counts as broken.
    pub max_consecutive_read_errors: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            stop_timeout: Duration::from_secs(2),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            jpeg_quality: 80,
            max_consecutive_read_errors: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Encoded output of one processed frame. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFrame {
    pub frame_number: u64,
    pub captured_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Processed { detections: usize },
    /// Pulled but not sampled for detection.
    Skipped,
    Exhausted,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("detector failed: {0:#}")]
    Detector(anyhow::Error),

    #[error("failed to encode jpeg: {0}")]
    Encode(#[from] ImageError),
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

struct FramePipeline {
    source: Box<dyn FrameSource>,
    frame_counter: u64,
    consecutive_read_errors: u32,
}

pub struct InferenceSession {
    id: String,
    config: SessionConfig,
    settings: LoopSettings,
    source_description: String,
    /// The source lives behind this lock so a release never interleaves with a read.
    pipeline: Mutex<FramePipeline>,
    detector: SharedDetector,
    store: RwLock<DetectionStore>,
    latest: RwLock<Option<Arc<AnnotatedFrame>>>,
    notifier: Arc<NotificationDispatcher>,
    cancel: CancellationToken,
    frames_read: AtomicU64,
    frames_processed: AtomicU64,
    detections_total: AtomicU64,
    finished: AtomicBool,
    metrics: PipelineMetrics,
}

impl InferenceSession {
    pub fn new(
        id: impl Into<String>,
        source: Box<dyn FrameSource>,
        config: SessionConfig,
        settings: LoopSettings,
        detector: SharedDetector,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        let source_description = source.describe();
        Self {
            id: id.into(),
            config,
            store: RwLock::new(DetectionStore::new(settings.history_capacity)),
            settings,
            source_description,
            pipeline: Mutex::new(FramePipeline {
                source,
                frame_counter: 0,
                consecutive_read_errors: 0,
            }),
            detector,
            latest: RwLock::new(None),
            notifier,
            cancel: CancellationToken::new(),
            frames_read: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            detections_total: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            metrics: PipelineMetrics::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn source_description(&self) -> &str {
        &self.source_description
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn detections_total(&self) -> u64 {
        self.detections_total.load(Ordering::Relaxed)
    }

    /// True once the loop has exited and released its source.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn lock_pipeline(&self) -> MutexGuard<'_, FramePipeline> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_recent(&self, limit: usize) -> Vec<Arc<DetectionRecord>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_recent(limit)
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<DetectionRecord>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_by_id(id)
    }

    pub fn latest_frame(&self) -> Option<Arc<AnnotatedFrame>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish_frame(&self, frame: AnnotatedFrame) {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent stream fallback step may finish out of order.
        let is_newer = latest
            .as_ref()
            .is_none_or(|current| current.frame_number < frame.frame_number);
        if is_newer {
            *latest = Some(Arc::new(frame));
        }
    }

    /// Release the frame source. Blocks while a read is in flight.
    pub fn release_source(&self) {
        self.lock_pipeline().source.release();
    }

    /// Release the source only if no read is in flight. Returns whether it was released.
    pub fn try_release_source(&self) -> bool {
        match self.pipeline.try_lock() {
            Ok(mut pipeline) => {
                pipeline.source.release();
                true
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().source.release();
                true
            }
            Err(std::sync::TryLockError::WouldBlock) => false,
        }
    }

    /// Pull one frame and, if it is sampled, run it through
    /// detect → crop → annotate → store → notify → publish.
    pub fn step(&self) -> Result<StepOutcome, StepError> {
        let (frame, frame_number) = {
            let mut pipeline = self.lock_pipeline();
            match pipeline.source.next_frame() {
                Ok(Some(frame)) => {
                    pipeline.consecutive_read_errors = 0;
                    pipeline.frame_counter += 1;
                    (frame, pipeline.frame_counter)
                }
                Ok(None) => return Ok(StepOutcome::Exhausted),
                Err(e) => {
                    pipeline.consecutive_read_errors += 1;
                    return Err(e.into());
                }
            }
        };

        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.metrics.frames.add(1, &[]);

        if !self.config.should_detect(frame_number) {
            self.metrics.frames_skipped.add(1, &[]);
            return Ok(StepOutcome::Skipped);
        }

        let started = Instant::now();
        let captured_at = Utc::now();
        let threshold = self.config.confidence_threshold;
        let quality = self.settings.jpeg_quality;
        let (width, height) = frame.dimensions();

        let raw = {
            let _s = tracing::debug_span!("detect", frame_number).entered();
            let mut detector = self.detector.lock().unwrap_or_else(PoisonError::into_inner);
            match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&frame, threshold))) {
                Ok(result) => result.map_err(StepError::Detector)?,
                Err(payload) => {
                    return Err(StepError::Detector(anyhow::anyhow!(
                        "detector panicked: {}",
                        panic_message(payload.as_ref())
                    )));
                }
            }
        };

        let mut batch = Vec::with_capacity(raw.len());
        let mut overlays = Vec::with_capacity(raw.len());
        for detection in raw.iter().filter(|d| d.confidence >= threshold) {
            let Some(bbox) = BoundingBox::from_f32(detection.bbox).clamp_to(width, height) else {
                tracing::debug!(
                    class_name = %detection.class_name,
                    bbox = ?detection.bbox,
                    "Skipping detection with empty box"
                );
                continue;
            };

            let crop_jpeg = encode_jpeg(&crop(&frame, &bbox), quality)?;
            batch.push(Arc::new(DetectionRecord {
                id: DetectionRecord::make_id(captured_at, frame_number, batch.len()),
                timestamp: captured_at,
                class_name: detection.class_name.clone(),
                confidence: detection.confidence,
                bbox,
                crop_jpeg,
            }));
            overlays.push((bbox, label_text(&detection.class_name, detection.confidence)));
        }

        let mut annotated = frame;
        annotate(&mut annotated, &overlays);

        let detections = batch.len();
        if detections > 0 {
            self.store
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .append(batch.iter().cloned());
            self.detections_total
                .fetch_add(detections as u64, Ordering::Relaxed);
            self.metrics.detections.add(detections as u64, &[]);
            self.notifier.dispatch(batch);
        }

        let jpeg = encode_jpeg(&annotated, quality)?;
        self.publish_frame(AnnotatedFrame {
            frame_number,
            captured_at,
            width,
            height,
            jpeg,
        });

        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .frame_duration
            .record(started.elapsed().as_secs_f64(), &[]);

        Ok(StepOutcome::Processed { detections })
    }

    /// Drive `step` until cancelled, exhausted or the source breaks, then
    /// release the source.
    pub fn run(&self) {
        tracing::info!(
            session_id = %self.id,
            source = %self.source_description,
            confidence = self.config.confidence_threshold,
            sample_rate = self.config.sample_rate,
            "Inference loop started"
        );

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(session_id = %self.id, "Inference loop cancelled");
                break;
            }

            match self.step() {
                Ok(StepOutcome::Exhausted) => {
                    tracing::info!(session_id = %self.id, "Video source exhausted");
                    break;
                }
                Ok(StepOutcome::Processed { detections }) => {
                    let processed = self.frames_processed();
                    if processed.is_multiple_of(30) {
                        tracing::debug!(
                            frames_processed = processed,
                            frames_read = self.frames_read(),
                            detections,
                            "Frame processed"
                        );
                    }
                }
                Ok(StepOutcome::Skipped) => {}
                Err(StepError::Source(e)) => {
                    self.metrics.frame_errors.add(1, &[]);
                    let failures = self.lock_pipeline().consecutive_read_errors;
                    if failures >= self.settings.max_consecutive_read_errors {
                        tracing::error!(
                            session_id = %self.id,
                            error = %e,
                            failures,
                            "Video source broken, stopping inference loop"
                        );
                        break;
                    }
                    tracing::warn!(error = %e, failures, "Failed to read frame");
                }
                Err(e) => {
                    self.metrics.frame_errors.add(1, &[]);
                    tracing::error!(error = %e, "Failed to process frame");
                }
            }

            std::thread::sleep(self.settings.frame_interval);
        }

        self.release_source();
        self.finished.store(true, Ordering::Release);
        tracing::info!(
            session_id = %self.id,
            frames_read = self.frames_read(),
            frames_processed = self.frames_processed(),
            detections = self.detections_total(),
            "Inference loop stopped"
        );
    }
}
