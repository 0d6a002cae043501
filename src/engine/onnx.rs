//! ONNX Runtime engine for `ort = 2.0.0-rc.10`.
//!
//! - Weights live inside the `.onnx` file; a separate parameter file is ignored.
//! - ONNX Runtime only reports concrete output shapes after a run, so
//!   `reshape` runs one forward pass over the zeroed buffer to materialize them.
//! - Outputs are copied into owned buffers so they stay readable between runs.

use crate::engine::{Engine, NetworkFiles};
use anyhow::{Context, Result};
use ndarray::{Array4, ArrayD, ArrayViewD, ArrayViewMut4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{TensorRef, ValueType},
};
use std::collections::HashMap;
use tracing::debug;

pub struct OnnxEngine {
    session: Session,
    input_name: String,
    declared: Vec<i64>,
    output_names: Vec<String>,
    input: Array4<f32>,
    outputs: HashMap<String, ArrayD<f32>>,
}

impl OnnxEngine {
    pub fn new(files: &NetworkFiles) -> Result<Self> {
        let mut builder = Session::builder()
            .context("failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = files.threads {
            builder = builder.with_intra_threads(threads)?;
        }
        let session = builder
            .commit_from_file(&files.topology)
            .with_context(|| format!("cannot load ONNX model: {}", files.topology.display()))?;

        if let Some(params) = &files.params {
            debug!("ONNX weights are embedded, ignoring {}", params.display());
        }

        let input_name = session.inputs.first().map(|i| i.name.clone()).unwrap_or_default();
        let declared: Vec<i64> = match session.inputs.first().map(|i| &i.input_type) {
            Some(ValueType::Tensor { shape, .. }) => shape.iter().copied().collect(),
            _ => Vec::new(),
        };
        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        // placeholder extent until the first reshape
        let dim = |i: usize| declared.get(i).map_or(1, |&d| d.max(1) as usize);
        let input = Array4::zeros((1, dim(1), dim(2), dim(3)));

        debug!(
            "loaded ONNX model {}: input '{}' {:?}, outputs {:?}",
            files.topology.display(),
            input_name,
            declared,
            output_names
        );

        Ok(Self {
            session,
            input_name,
            declared,
            output_names,
            input,
            outputs: HashMap::new(),
        })
    }
}

impl Engine for OnnxEngine {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn input_count(&self) -> usize {
        self.session.inputs.len()
    }

    fn declared_input_shape(&self) -> Vec<i64> {
        self.declared.clone()
    }

    fn input_shape(&self) -> [usize; 4] {
        let (n, c, h, w) = self.input.dim();
        [n, c, h, w]
    }

    fn reshape(&mut self, shape: [usize; 4]) -> Result<()> {
        let [n, c, h, w] = shape;
        self.input = Array4::zeros((n, c, h, w));
        self.forward()
            .with_context(|| format!("ONNX: shape propagation for {:?} failed", shape))
    }

    fn input_mut(&mut self) -> ArrayViewMut4<'_, f32> {
        self.input.view_mut()
    }

    fn forward(&mut self) -> Result<()> {
        let tensor = TensorRef::from_array_view(self.input.view())
            .context("ONNX: input buffer is not a valid tensor")?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;

        self.outputs.clear();
        for name in &self.output_names {
            let view = outputs[name.as_str()]
                .try_extract_array::<f32>()
                .with_context(|| format!("ONNX: output '{}' is not a Tensor<f32>", name))?;
            self.outputs.insert(name.clone(), view.to_owned());
        }
        Ok(())
    }

    fn output(&self, name: &str) -> Option<ArrayViewD<'_, f32>> {
        self.outputs.get(name).map(|a| a.view())
    }

    fn output_names(&self) -> Vec<String> {
        self.output_names.clone()
    }
}
