//! Scriptable in-memory engine and model-directory fixtures for tests.

use crate::engine::Engine;
use anyhow::Result;
use ndarray::{Array2, Array3, Array4, ArrayD, ArrayViewD, ArrayViewMut4, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// How a mock output is computed from the input buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MockOutput {
    /// `[n, k]`: element `j` of sample `i` is the mean of sample `i`'s input plus `j`.
    Fixed(usize),
    /// `[n, 1, h, w]`: per-pixel mean over channels.
    Dense,
    /// `[n, c, h, w]`: a copy of the input buffer.
    Echo,
}

pub(crate) struct MockEngine {
    inputs: usize,
    declared: Vec<i64>,
    input: Array4<f32>,
    outputs: Vec<(String, MockOutput)>,
    values: Vec<(String, ArrayD<f32>)>,
    reshapes: Arc<AtomicUsize>,
    forwards: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl MockEngine {
    pub(crate) fn new(declared: &[i64]) -> Self {
        Self {
            inputs: 1,
            declared: declared.to_vec(),
            input: Array4::zeros((1, 1, 1, 1)),
            outputs: Vec::new(),
            values: Vec::new(),
            reshapes: Arc::new(AtomicUsize::new(0)),
            forwards: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_output(mut self, name: &str, output: MockOutput) -> Self {
        self.outputs.push((name.to_string(), output));
        self
    }

    pub(crate) fn with_inputs(mut self, inputs: usize) -> Self {
        self.inputs = inputs;
        self
    }

    /// Counter of reshapes, readable after the engine moved into an extractor.
    pub(crate) fn reshape_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reshapes)
    }

    pub(crate) fn forward_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.forwards)
    }

    /// Number of upcoming reshapes that fail after the input was reallocated,
    /// the way a backend fails when shape propagation breaks.
    pub(crate) fn reshape_failures(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.failures)
    }

    fn refresh(&mut self) {
        self.values = self
            .outputs
            .iter()
            .map(|(name, output)| (name.clone(), self.compute(*output)))
            .collect();
    }

    fn compute(&self, output: MockOutput) -> ArrayD<f32> {
        let (n, _, h, w) = self.input.dim();
        match output {
            MockOutput::Fixed(k) => {
                let mut out = Array2::<f32>::zeros((n, k));
                for (i, mut row) in out.outer_iter_mut().enumerate() {
                    let mean = self.input.index_axis(Axis(0), i).mean().unwrap_or(0.0);
                    for (j, v) in row.iter_mut().enumerate() {
                        *v = mean + j as f32;
                    }
                }
                out.into_dyn()
            }
            MockOutput::Dense => {
                let mean = self
                    .input
                    .mean_axis(Axis(1))
                    .unwrap_or_else(|| Array3::zeros((n, h, w)));
                mean.insert_axis(Axis(1)).into_dyn()
            }
            MockOutput::Echo => self.input.clone().into_dyn(),
        }
    }
}

impl Engine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn input_count(&self) -> usize {
        self.inputs
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
        self.reshapes.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!("shape propagation failed for {:?}", shape);
        }
        self.refresh();
        Ok(())
    }

    fn input_mut(&mut self) -> ArrayViewMut4<'_, f32> {
        self.input.view_mut()
    }

    fn forward(&mut self) -> Result<()> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        self.refresh();
        Ok(())
    }

    fn output(&self, name: &str) -> Option<ArrayViewD<'_, f32>> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v.view())
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// Creates a model directory with a placeholder topology file and the given manifest.
pub(crate) fn model_dir(manifest: &str) -> TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::write(dir.path().join(crate::model::TOPOLOGY_FILE), b"mock").expect("topology");
    std::fs::write(dir.path().join(crate::model::MANIFEST_FILE), manifest).expect("manifest");
    dir
}
