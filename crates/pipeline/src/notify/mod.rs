//! Out-of-band delivery of new detections.
//!
//! The inference loop hands each non-empty batch to a [`NotificationDispatcher`],
//! which queues it for a single worker thread. A full queue drops the batch;
//! sink failures are logged and counted, never retried.

mod mqtt;
mod webhook;

pub use mqtt::MqttSink;
pub use webhook::WebhookSink;

use crate::record::{BoundingBox, DetectionRecord};
use crossbeam_channel::{Sender, TrySendError, bounded};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;

pub type Batch = Vec<Arc<DetectionRecord>>;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize notification: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint rejected notification with status {0}")]
    Rejected(u16),
}

pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver(&self, batch: &[Arc<DetectionRecord>]) -> Result<(), SinkError>;
}

/// Wire shape of one detection in webhook and MQTT payloads. `animal` mirrors
/// `class_name` for the alerting service.
#[derive(Debug, Serialize)]
pub struct DetectionNotification<'a> {
    pub id: &'a str,
    pub animal: &'a str,
    pub class_name: &'a str,
    pub confidence: f32,
    pub formatted_time: String,
    pub timestamp: f64,
    pub bbox: BoundingBox,
}

impl<'a> From<&'a DetectionRecord> for DetectionNotification<'a> {
    fn from(record: &'a DetectionRecord) -> Self {
        Self {
            id: &record.id,
            animal: &record.class_name,
            class_name: &record.class_name,
            confidence: record.confidence,
            formatted_time: record.formatted_time(),
            timestamp: record.timestamp_secs(),
            bbox: record.bbox,
        }
    }
}

/// Logs each batch at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn deliver(&self, batch: &[Arc<DetectionRecord>]) -> Result<(), SinkError> {
        for record in batch {
            tracing::info!(
                id = %record.id,
                class_name = %record.class_name,
                confidence = record.confidence,
                "Detection"
            );
        }
        Ok(())
    }
}

/// Delivers to every inner sink; one failing sink does not stop the others.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    fn deliver(&self, batch: &[Arc<DetectionRecord>]) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(batch) {
                tracing::warn!(sink = sink.name(), error = %e, "Notification sink failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub queued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Bounded queue in front of a sink, drained by one worker thread.
pub struct NotificationDispatcher {
    sender: Mutex<Option<Sender<Batch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    sink_name: String,
}

impl NotificationDispatcher {
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> std::io::Result<Self> {
        let (sender, receiver) = bounded::<Batch>(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let sink_name = sink.name().to_string();

        let worker_counters = Arc::clone(&counters);
        let worker = std::thread::Builder::new()
            .name("notify-dispatch".into())
            .spawn(move || {
                for batch in receiver.iter() {
                    match sink.deliver(&batch) {
                        Ok(()) => {
                            worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(sink = sink.name(), count = batch.len(), "Notification delivered");
                        }
                        Err(e) => {
                            worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(sink = sink.name(), error = %e, "Notification delivery failed");
                        }
                    }
                }
                tracing::debug!("Notification dispatcher stopped");
            })?;

        tracing::info!(sink = %sink_name, capacity, "Notification dispatcher started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
            sink_name,
        })
    }

    /// Queue `batch` without blocking. Returns false when it was dropped.
    pub fn dispatch(&self, batch: Batch) -> bool {
        if batch.is_empty() {
            return true;
        }

        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(batch) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(batch)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sink = %self.sink_name,
                    count = batch.len(),
                    "Notification queue full, dropping batch"
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(sink = %self.sink_name, "Notification worker gone, dropping batch");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the queue and wait for queued batches to drain.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            tracing::error!("Notification worker panicked");
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
