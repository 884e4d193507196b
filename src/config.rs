use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:1883";
const DEFAULT_CLIENT_ID: &str = "helmwatchd";
const DEFAULT_REQUEST_TOPIC: &str = "helmwatch/requests";
const DEFAULT_RESULTS_TOPIC: &str = "helmwatch/results";
const DEFAULT_STORAGE_ENDPOINT: &str = "http://127.0.0.1:9000/images";
const DEFAULT_MODEL_INPUT_SIZE: u32 = 640;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct HelmwatchConfigFile {
    queue: Option<QueueConfigFile>,
    storage: Option<StorageConfigFile>,
    detection: Option<DetectionConfigFile>,
    annotation: Option<AnnotationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    broker_addr: Option<String>,
    client_id: Option<String>,
    request_topic: Option<String>,
    results_topic: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    endpoint: Option<String>,
    local_root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    specialized_model_path: Option<PathBuf>,
    person_model_path: Option<PathBuf>,
    model_input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotationConfigFile {
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HelmwatchConfig {
    pub queue: QueueSettings,
    pub storage: StorageSettings,
    pub detection: DetectionSettings,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub broker_addr: String,
    pub client_id: String,
    pub request_topic: String,
    pub results_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub endpoint: String,
    /// When set, objects are read from and written to this directory instead
    /// of the HTTP endpoint. Development and test use.
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub specialized_model_path: Option<PathBuf>,
    pub person_model_path: Option<PathBuf>,
    pub model_input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

impl HelmwatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HELMWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: HelmwatchConfigFile) -> Self {
        let queue = QueueSettings {
            broker_addr: file
                .queue
                .as_ref()
                .and_then(|q| q.broker_addr.clone())
                .unwrap_or_else(|| DEFAULT_BROKER_ADDR.to_string()),
            client_id: file
                .queue
                .as_ref()
                .and_then(|q| q.client_id.clone())
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            request_topic: file
                .queue
                .as_ref()
                .and_then(|q| q.request_topic.clone())
                .unwrap_or_else(|| DEFAULT_REQUEST_TOPIC.to_string()),
            results_topic: file
                .queue
                .as_ref()
                .and_then(|q| q.results_topic.clone())
                .unwrap_or_else(|| DEFAULT_RESULTS_TOPIC.to_string()),
            username: file.queue.as_ref().and_then(|q| q.username.clone()),
            password: file.queue.as_ref().and_then(|q| q.password.clone()),
        };
        let storage = StorageSettings {
            endpoint: file
                .storage
                .as_ref()
                .and_then(|s| s.endpoint.clone())
                .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string()),
            local_root: file.storage.and_then(|s| s.local_root),
        };
        let detection = DetectionSettings {
            specialized_model_path: file
                .detection
                .as_ref()
                .and_then(|d| d.specialized_model_path.clone()),
            person_model_path: file
                .detection
                .as_ref()
                .and_then(|d| d.person_model_path.clone()),
            model_input_size: file
                .detection
                .as_ref()
                .and_then(|d| d.model_input_size)
                .unwrap_or(DEFAULT_MODEL_INPUT_SIZE),
            confidence_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: file
                .detection
                .and_then(|d| d.iou_threshold)
                .unwrap_or(DEFAULT_IOU_THRESHOLD),
        };
        Self {
            queue,
            storage,
            detection,
            font_path: file.annotation.and_then(|a| a.font_path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("HELMWATCH_BROKER_ADDR") {
            if !addr.trim().is_empty() {
                self.queue.broker_addr = addr;
            }
        }
        if let Ok(topic) = std::env::var("HELMWATCH_REQUEST_TOPIC") {
            if !topic.trim().is_empty() {
                self.queue.request_topic = topic;
            }
        }
        if let Ok(topic) = std::env::var("HELMWATCH_RESULTS_TOPIC") {
            if !topic.trim().is_empty() {
                self.queue.results_topic = topic;
            }
        }
        if let Ok(endpoint) = std::env::var("HELMWATCH_STORAGE_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.storage.endpoint = endpoint;
            }
        }
        if let Ok(path) = std::env::var("HELMWATCH_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.specialized_model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("HELMWATCH_PERSON_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.person_model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("HELMWATCH_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("HELMWATCH_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(path) = std::env::var("HELMWATCH_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !self.queue.broker_addr.contains(':') {
            return Err(anyhow!(
                "broker address {} must be host:port",
                self.queue.broker_addr
            ));
        }
        if self.queue.request_topic == self.queue.results_topic {
            return Err(anyhow!("request and results topics must differ"));
        }
        let conf = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&conf) {
            return Err(anyhow!("confidence threshold {} must be in [0, 1]", conf));
        }
        let iou = self.detection.iou_threshold;
        if !(0.0..=1.0).contains(&iou) {
            return Err(anyhow!("iou threshold {} must be in [0, 1]", iou));
        }
        if self.detection.model_input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<HelmwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
