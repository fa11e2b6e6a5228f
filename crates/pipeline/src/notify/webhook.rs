use super::{DetectionNotification, NotificationSink, SinkError};
use crate::record::DetectionRecord;
use std::sync::Arc;
use std::time::Duration;

/// POSTs one JSON document per detection to an HTTP endpoint.
pub struct WebhookSink {
    agent: ureq::Agent,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let url = url.into();
        tracing::info!(url = %url, timeout_ms = timeout.as_millis(), "Webhook sink configured");
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url,
        }
    }

    fn post(&self, record: &DetectionRecord) -> Result<(), SinkError> {
        let body = serde_json::to_value(DetectionNotification::from(record))?;
        match self.agent.post(&self.url).send_json(body) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(SinkError::Rejected(status)),
            Err(ureq::Error::Transport(e)) => Err(SinkError::Transport(e.to_string())),
        }
    }
}

impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, batch: &[Arc<DetectionRecord>]) -> Result<(), SinkError> {
        for record in batch {
            self.post(record)?;
            tracing::debug!(id = %record.id, "Webhook notification sent");
        }
        Ok(())
    }
}
