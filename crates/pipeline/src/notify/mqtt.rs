use super::{DetectionNotification, NotificationSink, SinkError};
use crate::record::DetectionRecord;
use chrono::Utc;
use common::retry::RetryPolicy;
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct DetectionBatchMessage<'a> {
    pub device_id: &'a str,
    pub timestamp: String,
    pub count: usize,
    pub detections: Vec<DetectionNotification<'a>>,
}

pub(crate) fn batch_message<'a>(device_id: &'a str, batch: &'a [Arc<DetectionRecord>]) -> DetectionBatchMessage<'a> {
    DetectionBatchMessage {
        device_id,
        timestamp: Utc::now().to_rfc3339(),
        count: batch.len(),
        detections: batch.iter().map(|r| DetectionNotification::from(r.as_ref())).collect(),
    }
}

/// Broker connection state shared by the sink and its event-loop thread.
#[derive(Debug)]
struct BrokerLink {
    connected: AtomicBool,
    failures: AtomicU32,
    reconnect: RetryPolicy,
}

impl BrokerLink {
    fn new(reconnect: RetryPolicy) -> Self {
        Self {
            connected: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            reconnect,
        }
    }

    /// Track one event-loop result. Every error yields a pause before the next
    /// poll, which is what makes rumqttc try the broker again.
    fn observe(&self, event: &Result<Event, ConnectionError>) -> Option<Duration> {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                self.connected.store(true, Ordering::Release);
                self.failures.store(0, Ordering::Relaxed);
                tracing::info!(session_present = ack.session_present, "MQTT broker connected");
                None
            }
            Ok(_) => None,
            Err(e) => {
                let was_connected = self.connected.swap(false, Ordering::AcqRel);
                let failures = self.failures.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                let delay = self.delay_after(failures);
                if was_connected {
                    tracing::warn!(error = %e, retry_in_ms = delay.as_millis(), "MQTT connection lost");
                } else {
                    tracing::warn!(
                        error = %e,
                        failures,
                        retry_in_ms = delay.as_millis(),
                        "MQTT broker unreachable"
                    );
                }
                Some(delay)
            }
        }
    }

    /// Policy delay for the n-th consecutive failure plus up to 10% jitter.
    fn delay_after(&self, failures: u32) -> Duration {
        let base = self.reconnect.delay_for_attempt(failures.saturating_sub(1));
        let jitter_ms = (base.as_millis() as u64 / 10).max(1);
        base + Duration::from_millis(fastrand::u64(0..jitter_ms))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

fn reconnect_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: u32::MAX,
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(30),
    }
}

/// Publishes one message per batch, at-least-once.
pub struct MqttSink {
    client: Client,
    topic: String,
    device_id: String,
    link: Arc<BrokerLink>,
}

impl MqttSink {
    pub fn connect(broker_host: &str, broker_port: u16, topic: String, device_id: String) -> Self {
        let mut options = MqttOptions::new(format!("detection-gateway-{}", device_id), broker_host, broker_port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let (client, mut connection) = Client::new(options, 10);
        let link = Arc::new(BrokerLink::new(reconnect_policy()));

        let worker_link = Arc::clone(&link);
        let spawned = std::thread::Builder::new()
            .name("mqtt-events".into())
            .spawn(move || {
                // Ends once every client handle is dropped.
                for event in connection.iter() {
                    if let Some(delay) = worker_link.observe(&event) {
                        std::thread::sleep(delay);
                    }
                }
                tracing::debug!("MQTT event loop closed");
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to spawn MQTT event thread, publishes will queue");
        }

        tracing::info!(
            broker = %format!("{}:{}", broker_host, broker_port),
            topic = %topic,
            device_id = %device_id,
            "MQTT sink initialized"
        );

        Self {
            client,
            topic,
            device_id,
            link,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}

impl NotificationSink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn deliver(&self, batch: &[Arc<DetectionRecord>]) -> Result<(), SinkError> {
        if !self.is_connected() {
            tracing::debug!("MQTT broker not connected yet, queueing publish");
        }

        let payload = serde_json::to_vec(&batch_message(&self.device_id, batch))?;
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        tracing::debug!(topic = %self.topic, count = batch.len(), "Detection batch published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BoundingBox;
    use rumqttc::{ConnAck, ConnectReturnCode};

    fn link() -> BrokerLink {
        BrokerLink::new(RetryPolicy {
            max_attempts: u32::MAX,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(800),
        })
    }

    fn connack() -> Result<Event, ConnectionError> {
        Ok(Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        })))
    }

    #[test]
    fn every_error_kind_backs_off() {
        let errors = [
            ConnectionError::NetworkTimeout,
            ConnectionError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
            ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized),
            ConnectionError::FlushTimeout,
        ];

        for error in errors {
            let link = link();
            let delay = link.observe(&Err(error)).expect("errors must pause the event loop");
            assert!(delay >= Duration::from_millis(100));
        }
    }

    #[test]
    fn delay_grows_with_consecutive_failures_and_caps() {
        let link = link();
        let refused = || Err(ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword));

        let delays: Vec<Duration> = (0..6).map(|_| link.observe(&refused()).unwrap()).collect();

        assert!(delays[0] >= Duration::from_millis(100) && delays[0] < Duration::from_millis(110));
        assert!(delays[1] >= Duration::from_millis(200) && delays[1] < Duration::from_millis(220));
        assert!(delays[5] >= Duration::from_millis(800) && delays[5] < Duration::from_millis(880));
    }

    #[test]
    fn connack_marks_connected_and_resets_backoff() {
        let link = link();
        for _ in 0..4 {
            link.observe(&Err(ConnectionError::NetworkTimeout));
        }
        assert!(!link.is_connected());

        assert_eq!(link.observe(&connack()), None);
        assert!(link.is_connected());

        let delay = link.observe(&Err(ConnectionError::NetworkTimeout)).unwrap();
        assert!(delay < Duration::from_millis(110), "backoff restarts after a connection");
        assert!(!link.is_connected());
    }

    #[test]
    fn batch_message_carries_every_record() {
        let batch: Vec<Arc<DetectionRecord>> = (0..3)
            .map(|i| {
                Arc::new(DetectionRecord {
                    id: format!("42_{}", i),
                    timestamp: Utc::now(),
                    class_name: "boar".into(),
                    confidence: 0.6,
                    bbox: BoundingBox::new(0, 0, 5, 5),
                    crop_jpeg: Vec::new(),
                })
            })
            .collect();

        let json = serde_json::to_value(batch_message("cam-1", &batch)).unwrap();
        assert_eq!(json["device_id"], "cam-1");
        assert_eq!(json["count"], 3);
        assert_eq!(json["detections"][2]["id"], "42_2");
        assert_eq!(json["detections"][0]["animal"], "boar");
    }
}
