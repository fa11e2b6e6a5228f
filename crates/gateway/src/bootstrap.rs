use crate::config::{GatewayConfig, ModelConfig};
use crate::state::AppState;
use anyhow::Result;
use pipeline::detector::{NoopDetector, SharedDetector, shared};
use pipeline::notify::{FanoutSink, LogSink, MqttSink, NotificationDispatcher, NotificationSink, WebhookSink};
use pipeline::{SessionController, SystemOpener};
use std::sync::Arc;

pub fn build_detector(config: &GatewayConfig) -> Result<SharedDetector> {
    match &config.model {
        Some(model) => load_model(model),
        None => {
            tracing::warn!("MODEL_PATH not set, running without a detection model");
            Ok(shared(NoopDetector))
        }
    }
}

#[cfg(feature = "ort-backend")]
fn load_model(model: &ModelConfig) -> Result<SharedDetector> {
    let detector = pipeline::detector::ort::YoloDetector::load(
        &model.path,
        model.classes.clone(),
        model.input_size,
    )?;
    Ok(shared(detector))
}

#[cfg(not(feature = "ort-backend"))]
fn load_model(model: &ModelConfig) -> Result<SharedDetector> {
    tracing::warn!(
        model = %model.path.display(),
        "Built without the ort-backend feature, model ignored"
    );
    Ok(shared(NoopDetector))
}

pub fn build_sink(config: &GatewayConfig) -> Arc<dyn NotificationSink> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];

    if let Some(webhook) = &config.webhook {
        sinks.push(Arc::new(WebhookSink::new(webhook.url.clone(), webhook.timeout)));
    }
    if let Some(mqtt) = &config.mqtt {
        sinks.push(Arc::new(MqttSink::connect(
            &mqtt.broker_host,
            mqtt.broker_port,
            mqtt.topic.clone(),
            mqtt.device_id.clone(),
        )));
    }

    Arc::new(FanoutSink::new(sinks))
}

pub fn build_state(config: GatewayConfig) -> Result<AppState> {
    let detector = build_detector(&config)?;
    let notifier = NotificationDispatcher::spawn(build_sink(&config), config.notify_queue_capacity)?;
    let controller = SessionController::new(detector, Arc::new(notifier), config.loop_settings.clone());

    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        history_capacity = config.loop_settings.history_capacity,
        "Session controller ready"
    );

    Ok(AppState::new(
        Arc::new(controller),
        Arc::new(SystemOpener::default()),
        config,
    ))
}
