use crate::error::ConfigError;
use crate::imaging::Image;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;

/// Name of the optional per-model options file inside a model directory.
pub const OPTIONS_FILE: &str = "netfeat.toml";

/// Channel order the network was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Bgr,
    Rgb,
}

/// Per-model options read from `netfeat.toml`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    pub backend: String,
    pub channel_order: ChannelOrder,
    pub threads: Option<usize>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            channel_order: ChannelOrder::default(),
            threads: None,
        }
    }
}

impl ModelOptions {
    /// Reads the options file of a model directory, falling back to defaults when absent.
    pub fn load(model_dir: &Path) -> Result<Self, ConfigError> {
        let path = model_dir.join(OPTIONS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Options { path, source })
    }
}

// Runtime config (runtime.toml)

#[derive(Debug, Clone, Deserialize)]
pub struct ModelCfg {
    pub dir: PathBuf,
    #[serde(default = "default_batch")]
    pub batch: usize,
}

fn default_batch() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueCfg {
    pub max_batch: usize,
    pub max_wait_ms: u64,
}

impl Default for QueueCfg {
    fn default() -> Self {
        Self { max_batch: usize::MAX, max_wait_ms: 5 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputCfg {
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputCfg {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelCfg,
    #[serde(default)]
    pub queue: QueueCfg,
    #[serde(default)]
    pub input: InputCfg,
    #[serde(default)]
    pub output: OutputCfg,
}

// Job/Reply

pub type Reply = Result<FeatureRecord, String>;

#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub image: Image, // empty images are zero placeholders
    pub reply: oneshot::Sender<Reply>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub id: String,
    pub timestamp: String,
    pub dim: usize,
    pub features: Vec<f32>,
}

impl FeatureRecord {
    pub fn new(id: String, features: Vec<f32>) -> Self {
        Self {
            id,
            timestamp: Utc::now().to_rfc3339(),
            dim: features.len(),
            features,
        }
    }
}
