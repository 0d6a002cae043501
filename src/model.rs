//! Model directory loading.
//!
//! A model directory holds:
//! - `model.onnx`: network topology (and weights, for ONNX)
//! - `model.params`: trained parameters, for backends that keep them apart
//! - `mean`: optional mean values (text or serialized blob)
//! - `blobs`: names of the outputs to extract, in order
//! - `extra`: optional opaque payload handed back to callers
//! - `netfeat.toml`: optional [`ModelOptions`]

use crate::engine::{Engine, NetworkFiles};
use crate::error::ConfigError;
use crate::mean::load_means;
use crate::shape::SpatialMode;
use crate::types::{ChannelOrder, ModelOptions};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

pub const TOPOLOGY_FILE: &str = "model.onnx";
pub const PARAMS_FILE: &str = "model.params";
pub const MEAN_FILE: &str = "mean";
pub const MANIFEST_FILE: &str = "blobs";
pub const EXTRA_FILE: &str = "extra";

/// Validated engine parameters. Immutable once the extractor is built.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub batch: usize,
    pub channels: usize,
    /// Mode the network was declared with, before any request.
    pub mode: SpatialMode,
    pub means: Vec<f32>,
    pub outputs: Vec<String>,
    pub extra: Option<Vec<u8>>,
    pub channel_order: ChannelOrder,
}

pub(crate) struct LoadedModel {
    pub config: EngineConfig,
    pub engine: Box<dyn Engine>,
}

/// Loads and validates a model directory, then reshapes the engine to the
/// fixed or probe extent so output shapes can be inspected.
pub(crate) fn load_model<F>(
    dir: &Path,
    batch: usize,
    options: &ModelOptions,
    load: F,
) -> Result<LoadedModel, ConfigError>
where
    F: FnOnce(&NetworkFiles) -> anyhow::Result<Box<dyn Engine>>,
{
    if batch == 0 {
        return Err(ConfigError::InvalidBatch);
    }

    let topology = dir.join(TOPOLOGY_FILE);
    if !topology.is_file() {
        return Err(ConfigError::MissingFile { path: topology });
    }
    let params = dir.join(PARAMS_FILE);
    let files = NetworkFiles {
        topology,
        params: params.is_file().then_some(params),
        threads: options.threads,
    };
    let mut engine = load(&files).map_err(ConfigError::network)?;

    let inputs = engine.input_count();
    if inputs != 1 {
        return Err(ConfigError::InputCount { found: inputs });
    }
    let declared = engine.declared_input_shape();
    if declared.len() != 4 {
        return Err(ConfigError::InputRank { shape: declared });
    }
    let channels = match declared[1] {
        c @ (1 | 3) => c as usize,
        found => return Err(ConfigError::ChannelCount { found }),
    };
    let mode = SpatialMode::from_declared(declared[2], declared[3])?;

    let means = load_means(&dir.join(MEAN_FILE), channels)?;
    let outputs = read_manifest(&dir.join(MANIFEST_FILE))?;
    let available = engine.output_names();
    if let Some(name) = outputs.iter().find(|name| !available.contains(name)) {
        return Err(ConfigError::UnknownOutput { name: name.clone() });
    }
    let extra = read_extra(&dir.join(EXTRA_FILE));

    let (height, width) = mode.extent();
    engine
        .reshape([batch, channels, height, width])
        .map_err(ConfigError::network)?;

    Ok(LoadedModel {
        config: EngineConfig {
            batch,
            channels,
            mode,
            means,
            outputs,
            extra,
            channel_order: options.channel_order,
        },
        engine,
    })
}

/// Reads whitespace-separated output names, keeping their order.
pub fn read_manifest(path: &Path) -> Result<Vec<String>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::MissingFile { path: path.to_path_buf() });
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let names: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    if names.is_empty() {
        return Err(ConfigError::EmptyManifest { path: path.to_path_buf() });
    }
    Ok(names)
}

/// Reads the optional payload. Absence is silent, a failed read only warns.
pub fn read_extra(path: &Path) -> Option<Vec<u8>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(_) => {
            debug!("no extra payload at {}", path.display());
            return None;
        }
    };
    let mut bytes = Vec::new();
    match file.read_to_end(&mut bytes) {
        Ok(_) => Some(bytes),
        Err(e) => {
            warn!("failed to read extra payload {}: {e}", path.display());
            None
        }
    }
}
