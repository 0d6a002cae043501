use anyhow::Result;
use ndarray::{ArrayViewD, ArrayViewMut4};
use std::path::PathBuf;

#[cfg(feature = "onnx")]
pub mod onnx;
#[cfg(test)]
pub(crate) mod testing;

/// Inference runtime capability the extractor drives.
///
/// The engine owns the input buffer (`[batch, channels, height, width]`) and
/// one buffer per named output. `reshape` reallocates the input and
/// propagates the new shape to every output; anything borrowed from the
/// engine before a reshape is stale afterwards.
pub trait Engine: Send {
    fn name(&self) -> &'static str;

    fn input_count(&self) -> usize;

    /// Input shape as declared by the model. Placeholder or dynamic
    /// dimensions are reported as values `<= 1`.
    fn declared_input_shape(&self) -> Vec<i64>;

    /// Current extent of the input buffer.
    fn input_shape(&self) -> [usize; 4];

    fn reshape(&mut self, shape: [usize; 4]) -> Result<()>;

    /// The input buffer. Its base address is stable until the next reshape.
    fn input_mut(&mut self) -> ArrayViewMut4<'_, f32>;

    /// Runs inference over the current input buffer.
    fn forward(&mut self) -> Result<()>;

    fn output(&self, name: &str) -> Option<ArrayViewD<'_, f32>>;

    fn output_names(&self) -> Vec<String>;
}

/// Files an engine is loaded from.
#[derive(Debug, Clone)]
pub struct NetworkFiles {
    pub topology: PathBuf,
    /// Trained parameters, for backends that keep them outside the topology file.
    pub params: Option<PathBuf>,
    pub threads: Option<usize>,
}

pub struct EngineFactory;

impl EngineFactory {
    pub fn create(backend: &str, files: &NetworkFiles) -> Result<Box<dyn Engine>> {
        match backend {
            #[cfg(feature = "onnx")]
            "onnx" => Ok(Box::new(crate::engine::onnx::OnnxEngine::new(files)?)),

            other => anyhow::bail!(
                "backend '{}' is not supported (build with feature: onnx), topology {}",
                other,
                files.topology.display()
            ),
        }
    }
}
