#![allow(dead_code)]

use image::RgbImage;
use pipeline::notify::{NotificationSink, SinkError};
use pipeline::source::SyntheticSource;
use pipeline::{DetectionRecord, Detector, FrameSource, RawDetection, SourceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Returns the same detections for every frame it sees.
pub struct FixedDetector {
    pub detections: Vec<RawDetection>,
    pub calls: Arc<AtomicUsize>,
    /// Fail this many calls before answering.
    pub failures_left: usize,
    /// Panic on this many calls before answering.
    pub panics_left: usize,
}

impl FixedDetector {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            calls: Arc::new(AtomicUsize::new(0)),
            failures_left: 0,
            panics_left: 0,
        }
    }

    pub fn deer() -> Self {
        Self::new(vec![RawDetection::new([4.0, 4.0, 24.0, 20.0], "deer", 0.9)])
    }
}

impl Detector for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&mut self, _frame: &RgbImage, _threshold: f32) -> anyhow::Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics_left > 0 {
            self.panics_left -= 1;
            panic!("tensor shape mismatch");
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            anyhow::bail!("model not warmed up");
        }
        Ok(self.detections.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<Vec<Arc<DetectionRecord>>>>,
}

impl RecordingSink {
    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn deliver(&self, batch: &[Arc<DetectionRecord>]) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

/// Shared event log for ordering assertions across sources.
pub type EventLog = Arc<Mutex<Vec<String>>>;

/// Synthetic source that logs its first pull and its release.
pub struct TrackedSource {
    name: String,
    inner: SyntheticSource,
    log: EventLog,
    pulled: bool,
    released: bool,
}

impl TrackedSource {
    pub fn new(name: &str, frames: u64, log: EventLog) -> Self {
        Self {
            name: name.to_string(),
            inner: SyntheticSource::new(frames, 32, 24),
            log,
            pulled: false,
            released: false,
        }
    }
}

impl FrameSource for TrackedSource {
    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        if !self.pulled && !self.released {
            self.pulled = true;
            self.log.lock().unwrap().push(format!("{}:pull", self.name));
        }
        self.inner.next_frame()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.lock().unwrap().push(format!("{}:release", self.name));
        }
        self.inner.release();
    }

    fn describe(&self) -> String {
        format!("tracked:{}", self.name)
    }
}

/// Every read fails.
pub struct BrokenSource {
    pub released: Arc<Mutex<bool>>,
}

impl FrameSource for BrokenSource {
    fn is_ready(&self) -> bool {
        true
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        Err(SourceError::Decode {
            target: "broken".into(),
            reason: "corrupt packet".into(),
        })
    }

    fn release(&mut self) {
        *self.released.lock().unwrap() = true;
    }

    fn describe(&self) -> String {
        "broken".into()
    }
}

pub fn position(log: &EventLog, event: &str) -> Option<usize> {
    log.lock().unwrap().iter().position(|e| e == event)
}
