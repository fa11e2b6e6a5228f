use anyhow::{Context, Result};
use common::{Environment, env_opt, env_or};
use pipeline::LoopSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub classes: Vec<String>,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub environment: Environment,
    pub addr: SocketAddr,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub loop_settings: LoopSettings,
    pub stream_interval: Duration,
    pub notify_queue_capacity: usize,
    pub webhook: Option<WebhookConfig>,
    pub mqtt: Option<MqttConfig>,
    pub model: Option<ModelConfig>,
    pub capture_size: (u32, u32),
    pub otlp_endpoint: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            upload_dir: PathBuf::from("./uploads"),
            max_upload_bytes: 512 * 1024 * 1024,
            loop_settings: LoopSettings::default(),
            stream_interval: Duration::from_millis(33),
            notify_queue_capacity: pipeline::notify::DEFAULT_QUEUE_CAPACITY,
            webhook: None,
            mqtt: None,
            model: None,
            capture_size: (640, 480),
            otlp_endpoint: None,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let addr = match env_opt("GATEWAY_ADDR") {
            Some(addr) => addr
                .parse()
                .with_context(|| format!("GATEWAY_ADDR is not a socket address: {}", addr))?,
            None => defaults.addr,
        };

        let loop_settings = LoopSettings {
            frame_interval: Duration::from_millis(env_or("FRAME_INTERVAL_MS", 33)),
            stop_timeout: Duration::from_millis(env_or("STOP_TIMEOUT_MS", 2000)),
            history_capacity: env_or("HISTORY_CAPACITY", pipeline::store::DEFAULT_HISTORY_CAPACITY),
            jpeg_quality: env_or("JPEG_QUALITY", 80u8).clamp(1, 100),
            ..defaults.loop_settings
        };

        let webhook = env_opt("WEBHOOK_URL").map(|url| WebhookConfig {
            url,
            timeout: Duration::from_millis(env_or("WEBHOOK_TIMEOUT_MS", 5000)),
        });

        let mqtt = env_opt("MQTT_BROKER_HOST").map(|broker_host| MqttConfig {
            broker_host,
            broker_port: env_or("MQTT_BROKER_PORT", 1883),
            topic: env_opt("MQTT_TOPIC").unwrap_or_else(|| "detection-gateway/detections".to_string()),
            device_id: env_opt("MQTT_DEVICE_ID").unwrap_or_else(|| "unknown".to_string()),
        });

        let model = env_opt("MODEL_PATH").map(|path| ModelConfig {
            path: PathBuf::from(path),
            classes: env_opt("MODEL_CLASSES")
                .map(|s| parse_classes(&s))
                .unwrap_or_default(),
            input_size: env_or("MODEL_INPUT_SIZE", 640),
        });

        Ok(Self {
            environment: Environment::from_env(),
            addr,
            upload_dir: env_opt("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_upload_bytes: env_or("MAX_UPLOAD_MB", 512usize).saturating_mul(1024 * 1024),
            loop_settings,
            stream_interval: Duration::from_millis(env_or("STREAM_INTERVAL_MS", 33)),
            notify_queue_capacity: env_or("NOTIFY_QUEUE_CAPACITY", defaults.notify_queue_capacity),
            webhook,
            mqtt,
            model,
            capture_size: (
                env_or("CAPTURE_WIDTH", defaults.capture_size.0),
                env_or("CAPTURE_HEIGHT", defaults.capture_size.1),
            ),
            otlp_endpoint: env_opt("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

fn parse_classes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
