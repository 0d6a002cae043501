//! Output descriptors and per-sample feature extraction.
//!
//! A feature row is the concatenation, in manifest order, of every output's
//! per-sample elements.

use crate::engine::Engine;
use crate::error::MissingOutput;
use ndarray::{s, Array2, ArrayView1};
use std::borrow::Cow;

/// Flat features of one sample.
pub type FeatureVector = Vec<f32>;

/// One row per sample, `feature_dim` columns.
pub type FeatureTable = Array2<f32>;

/// A named output as seen after the most recent reshape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub name: String,
    /// Full shape, batch axis included.
    pub shape: Vec<usize>,
    /// Elements per batch slot (`total / batch`).
    pub per_sample: usize,
}

impl OutputDescriptor {
    /// Shape of one sample's slice of this output.
    pub fn sample_shape(&self) -> &[usize] {
        self.shape.get(1..).unwrap_or(&[])
    }
}

/// Describes `names` against the engine's current output buffers.
pub fn describe_outputs(
    engine: &dyn Engine,
    names: &[String],
    batch: usize,
) -> Result<Vec<OutputDescriptor>, MissingOutput> {
    names
        .iter()
        .map(|name| {
            let out = engine.output(name).ok_or_else(|| MissingOutput(name.clone()))?;
            Ok(OutputDescriptor {
                name: name.clone(),
                shape: out.shape().to_vec(),
                per_sample: out.len() / batch.max(1),
            })
        })
        .collect()
}

/// Sum of per-sample element counts.
pub fn feature_dim(outputs: &[OutputDescriptor]) -> usize {
    outputs.iter().map(|o| o.per_sample).sum()
}

/// Copies the first `n` samples of every output into a new table.
pub fn extract_outputs(
    engine: &dyn Engine,
    outputs: &[OutputDescriptor],
    n: usize,
) -> Result<FeatureTable, MissingOutput> {
    let mut table = FeatureTable::zeros((n, feature_dim(outputs)));
    let mut col = 0;
    for desc in outputs {
        let out = engine
            .output(&desc.name)
            .ok_or_else(|| MissingOutput(desc.name.clone()))?;
        let data: Cow<'_, [f32]> = match out.as_slice() {
            Some(slice) => Cow::Borrowed(slice),
            None => Cow::Owned(out.iter().copied().collect()),
        };
        let per = desc.per_sample;
        if data.len() < n * per {
            return Err(MissingOutput(desc.name.clone()));
        }
        for (i, mut row) in table.outer_iter_mut().enumerate() {
            let src = ArrayView1::from(&data[i * per..(i + 1) * per]);
            row.slice_mut(s![col..col + per]).assign(&src);
        }
        col += per;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{MockEngine, MockOutput};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_describe_outputs() {
        let mut engine = MockEngine::new(&[1, 3, 1, 1])
            .with_output("prob", MockOutput::Fixed(10))
            .with_output("map", MockOutput::Dense);
        engine.reshape([4, 3, 7, 3]).unwrap();

        let outputs = describe_outputs(&engine, &names(&["map", "prob"]), 4).unwrap();
        assert_eq!(outputs[0].shape, vec![4, 1, 7, 3]);
        assert_eq!(outputs[0].per_sample, 21);
        assert_eq!(outputs[0].sample_shape(), &[1, 7, 3]);
        assert_eq!(outputs[1].per_sample, 10);
        assert_eq!(feature_dim(&outputs), 31);

        assert_eq!(
            describe_outputs(&engine, &names(&["fc7"]), 4),
            Err(MissingOutput("fc7".to_string()))
        );
    }

    #[test]
    fn test_extract_concatenates_in_manifest_order() {
        let mut engine = MockEngine::new(&[1, 1, 1, 1])
            .with_output("a", MockOutput::Fixed(2))
            .with_output("b", MockOutput::Fixed(3));
        engine.reshape([3, 1, 2, 2]).unwrap();
        engine.input_mut().slice_mut(s![1, .., .., ..]).fill(10.0);
        engine.forward().unwrap();

        let outputs = describe_outputs(&engine, &names(&["b", "a"]), 3).unwrap();
        let table = extract_outputs(&engine, &outputs, 2).unwrap();

        assert_eq!(table.dim(), (2, 5));
        assert_eq!(table.row(0).to_vec(), vec![0.0, 1.0, 2.0, 0.0, 1.0]);
        assert_eq!(table.row(1).to_vec(), vec![10.0, 11.0, 12.0, 10.0, 11.0]);
    }
}
