//! Per-channel mean values for input normalization.
//!
//! Two on-disk formats are accepted: a whitespace-separated list of floats,
//! or a serialized blob (`BlobProto`) holding a mean image, reduced here to
//! one spatial average per channel. Anything else means zero.

use crate::error::ConfigError;
use ndarray::{ArrayView2, Axis};
use prost::Message;
use std::path::Path;
use tracing::{debug, warn};

/// Shape of a serialized blob.
#[derive(Clone, PartialEq, Message)]
pub struct BlobShape {
    #[prost(int64, repeated, tag = "1")]
    pub dim: Vec<i64>,
}

/// Serialized blob as written by the training framework's mean tool.
#[derive(Clone, PartialEq, Message)]
pub struct BlobProto {
    #[prost(int32, optional, tag = "1")]
    pub num: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub channels: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub height: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub width: Option<i32>,
    #[prost(float, repeated, tag = "5")]
    pub data: Vec<f32>,
    #[prost(message, optional, tag = "7")]
    pub shape: Option<BlobShape>,
    #[prost(double, repeated, tag = "8")]
    pub double_data: Vec<f64>,
}

impl BlobProto {
    /// `[num, channels, height, width]`, preferring the explicit shape over legacy fields.
    fn dims(&self) -> Option<[usize; 4]> {
        let dims: Vec<i64> = match &self.shape {
            Some(shape) if !shape.dim.is_empty() => {
                let mut dims = shape.dim.clone();
                while dims.len() < 4 {
                    dims.insert(0, 1);
                }
                dims
            }
            _ => vec![
                i64::from(self.num.unwrap_or(1)),
                i64::from(self.channels?),
                i64::from(self.height?),
                i64::from(self.width?),
            ],
        };
        if dims.len() != 4 || dims.iter().any(|&d| d <= 0) {
            return None;
        }
        let mut out = [0usize; 4];
        for (slot, &d) in out.iter_mut().zip(&dims) {
            *slot = usize::try_from(d).ok()?;
        }
        Some(out)
    }

    /// Spatial average of every channel plane of the first item.
    pub fn channel_means(&self) -> Option<Vec<f32>> {
        let [num, channels, height, width] = self.dims()?;
        let data: Vec<f32> = if self.data.is_empty() {
            self.double_data.iter().map(|&v| v as f32).collect()
        } else {
            self.data.clone()
        };
        // sizes come from the file; overflow means a corrupt blob
        let plane = height.checked_mul(width)?;
        let item = channels.checked_mul(plane)?;
        if data.len() != num.checked_mul(item)? {
            return None;
        }
        let first = ArrayView2::from_shape((channels, plane), &data[..item]).ok()?;
        first.mean_axis(Axis(1)).map(|m| m.to_vec())
    }
}

/// Parses the text format: every token must be a float.
pub fn parse_text(bytes: &[u8]) -> Option<Vec<f32>> {
    let text = std::str::from_utf8(bytes).ok()?;
    let values = text
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    (!values.is_empty()).then_some(values)
}

/// Loads the mean values for a network with `channels` input channels.
///
/// A missing or unparseable file yields zeros. A file whose channel count
/// disagrees with the network is a configuration error.
pub fn load_means(path: &Path, channels: usize) -> Result<Vec<f32>, ConfigError> {
    let zeros = vec![0.0; channels];
    if !path.exists() {
        debug!("no mean file at {}, using zero mean", path.display());
        return Ok(zeros);
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("cannot read mean file {}: {e}, using zero mean", path.display());
            return Ok(zeros);
        }
    };

    if let Some(values) = parse_text(&bytes) {
        return match values.len() {
            1 => Ok(vec![values[0]; channels]),
            n if n == channels => Ok(values),
            found => Err(ConfigError::MeanChannels { expected: channels, found }),
        };
    }

    match BlobProto::decode(bytes.as_slice()) {
        Ok(blob) => match (blob.dims(), blob.channel_means()) {
            (Some([_, c, _, _]), Some(_)) if c != channels => {
                Err(ConfigError::MeanChannels { expected: channels, found: c })
            }
            (_, Some(means)) => Ok(means),
            _ => {
                warn!("mean blob {} has inconsistent dimensions, using zero mean", path.display());
                Ok(zeros)
            }
        },
        Err(e) => {
            warn!("cannot parse mean file {}: {e}, using zero mean", path.display());
            Ok(zeros)
        }
    }
}
