//! The feature extractor: one engine instance, one request at a time.
//!
//! A request runs shape adaptation (variable networks may reshape), wraps
//! the input buffer into channel views, preprocesses through them, runs one
//! forward pass and copies the manifest outputs into feature rows.
//!
//! The extractor is not synchronized. Share it across threads only behind
//! a lock, or give every worker its own instance.

use crate::aliasing::{ChannelViews, WrapToken};
use crate::engine::{Engine, EngineFactory, NetworkFiles};
use crate::error::{ConfigError, ExtractError, UsageError};
use crate::imaging::Image;
use crate::model::{load_model, EngineConfig};
use crate::outputs::{
    describe_outputs, extract_outputs, feature_dim, FeatureTable, FeatureVector, OutputDescriptor,
};
use crate::preprocess::Preprocessor;
use crate::shape::{SpatialMode, PROBE_HEIGHT, PROBE_WIDTH};
use crate::types::{ChannelOrder, ModelOptions};
use std::path::Path;
use tracing::{debug, info};

pub struct Extractor {
    engine: Box<dyn Engine>,
    config: EngineConfig,
    mode: SpatialMode,
    preprocessor: Preprocessor,
    outputs: Vec<OutputDescriptor>,
    /// Input buffer generation, bumped on every reshape attempt.
    generation: u64,
}

impl Extractor {
    /// Loads a model directory with the backend named in its options file.
    pub fn open(model_dir: impl AsRef<Path>, batch: usize) -> Result<Self, ConfigError> {
        let dir = model_dir.as_ref();
        let options = ModelOptions::load(dir)?;
        let backend = options.backend.clone();
        Self::open_with_options(dir, batch, options, |files| EngineFactory::create(&backend, files))
    }

    /// Loads a model directory with a caller-supplied engine loader.
    pub fn open_with<F>(model_dir: impl AsRef<Path>, batch: usize, load: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&NetworkFiles) -> anyhow::Result<Box<dyn Engine>>,
    {
        let dir = model_dir.as_ref();
        let options = ModelOptions::load(dir)?;
        Self::open_with_options(dir, batch, options, load)
    }

    fn open_with_options<F>(dir: &Path, batch: usize, options: ModelOptions, load: F) -> Result<Self, ConfigError>
    where
        F: FnOnce(&NetworkFiles) -> anyhow::Result<Box<dyn Engine>>,
    {
        let loaded = load_model(dir, batch, &options, load)?;
        let config = loaded.config;
        let engine = loaded.engine;

        let outputs = describe_outputs(engine.as_ref(), &config.outputs, batch)?;
        let mut mode = config.mode;
        if let [only] = outputs.as_slice() {
            if !mode.is_fixed() && only.shape.len() == 4 && only.shape[2..] == [PROBE_HEIGHT, PROBE_WIDTH] {
                mode.mark_dense_output();
            }
        }

        info!(
            "loaded {} (backend={}, batch={}, channels={}, mode={:?}, outputs={:?}, dim={})",
            dir.display(),
            engine.name(),
            batch,
            config.channels,
            mode,
            config.outputs,
            feature_dim(&outputs)
        );

        let preprocessor = Preprocessor::new(config.channels, config.means.clone(), config.channel_order);
        Ok(Self {
            engine,
            config,
            mode,
            preprocessor,
            outputs,
            generation: 0,
        })
    }

    pub fn batch_capacity(&self) -> usize {
        self.config.batch
    }

    pub fn channels(&self) -> usize {
        self.config.channels
    }

    pub fn channel_order(&self) -> ChannelOrder {
        self.config.channel_order
    }

    pub fn mode(&self) -> SpatialMode {
        self.mode
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The opaque payload shipped with the model, if any.
    pub fn extra(&self) -> Option<&[u8]> {
        self.config.extra.as_deref()
    }

    /// Per-sample feature length for the current input extent.
    pub fn feature_dim(&self) -> usize {
        feature_dim(&self.outputs)
    }

    pub fn output_descriptors(&self) -> &[OutputDescriptor] {
        &self.outputs
    }

    /// Per-sample shape of every manifest output, in manifest order.
    ///
    /// Lets callers view a dense-output feature vector as a `height x width` map.
    pub fn output_shapes(&self) -> Vec<(String, Vec<usize>)> {
        self.outputs
            .iter()
            .map(|o| (o.name.clone(), o.sample_shape().to_vec()))
            .collect()
    }

    /// Extracts the features of a single image.
    pub fn apply(&mut self, image: &Image) -> Result<FeatureVector, ExtractError> {
        let table = self.run(std::slice::from_ref(image))?;
        Ok(table.row(0).to_vec())
    }

    /// Extracts one feature row per image with a single forward pass.
    ///
    /// Empty images are placeholders: their slot is zero-filled and they are
    /// exempt from the same-size check.
    pub fn apply_batch(&mut self, images: &[Image]) -> Result<FeatureTable, ExtractError> {
        if images.is_empty() {
            return Err(UsageError::EmptyBatch.into());
        }
        if images.len() > self.config.batch {
            return Err(UsageError::BatchTooLarge {
                requested: images.len(),
                capacity: self.config.batch,
            }
            .into());
        }
        let mut sized = images.iter().enumerate().filter(|(_, img)| !img.is_empty());
        if let Some((_, first)) = sized.next() {
            if let Some((index, other)) = sized.find(|(_, img)| img.size() != first.size()) {
                return Err(UsageError::NonUniformSize {
                    index,
                    expected: first.size(),
                    found: other.size(),
                }
                .into());
            }
        }
        self.run(images)
    }

    fn run(&mut self, images: &[Image]) -> Result<FeatureTable, ExtractError> {
        if let Some(reference) = images.iter().find(|img| !img.is_empty()) {
            self.adapt_to(reference.size())?;
        }

        let token = self.fill_input(images)?;
        self.verify_input(token)?;

        self.engine.forward().map_err(ExtractError::engine)?;
        debug!("forward pass: {} image(s), engine={}", images.len(), self.engine.name());

        Ok(extract_outputs(self.engine.as_ref(), &self.outputs, images.len())?)
    }

    /// Reshapes a variable network to `size` and recomputes the output descriptors.
    ///
    /// A failed reshape may leave the engine at the new extent with stale
    /// outputs. The mode keeps the old extent, so the next request reshapes again.
    fn adapt_to(&mut self, size: (usize, usize)) -> Result<(), ExtractError> {
        let attempt = self
            .mode
            .adapt(self.engine.as_mut(), self.config.batch, self.config.channels, size);
        let reshaped = match attempt {
            Ok(reshaped) => reshaped,
            Err(e) => {
                self.generation += 1;
                return Err(ExtractError::engine(e));
            }
        };
        if reshaped {
            self.generation += 1;
            self.outputs = describe_outputs(self.engine.as_ref(), &self.config.outputs, self.config.batch)?;
            debug!("output dim after reshape: {}", feature_dim(&self.outputs));
        }
        Ok(())
    }

    /// Preprocesses `images` into the input buffer through fresh channel views.
    fn fill_input(&mut self, images: &[Image]) -> Result<WrapToken, ExtractError> {
        let mut views = ChannelViews::wrap(self.engine.input_mut(), self.generation)?;
        self.preprocessor.preprocess_batch(images, &self.mode, &mut views)?;
        Ok(views.token())
    }

    /// Checks that the views were taken from the buffer the engine reads now.
    fn verify_input(&mut self, token: WrapToken) -> Result<(), UsageError> {
        token.verify(self.generation, self.engine.input_mut().as_ptr())
    }
}
