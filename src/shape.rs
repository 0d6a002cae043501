//! Spatial mode of the input buffer and the reshape decision.

use crate::engine::Engine;
use crate::error::ConfigError;
use anyhow::Result;
use tracing::debug;

/// Probe extent used to materialize output shapes of variable-size networks
/// before any real image arrives. Small and non-square on purpose.
pub const PROBE_HEIGHT: usize = 7;
pub const PROBE_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialMode {
    /// Extent fixed by the model; images are resized to it.
    Fixed { height: usize, width: usize },
    /// Extent follows the most recent image.
    ///
    /// `dense_output` marks networks whose single output is a per-pixel map.
    /// It is informational only.
    Variable {
        current_height: usize,
        current_width: usize,
        dense_output: bool,
    },
}

impl SpatialMode {
    /// Derives the mode from the declared input height and width.
    ///
    /// Both `> 1` is a fixed network; both `<= 1` are placeholders and the
    /// network starts out at the probe extent.
    pub fn from_declared(height: i64, width: i64) -> Result<Self, ConfigError> {
        match (height > 1, width > 1) {
            (true, true) => Ok(Self::Fixed {
                height: height as usize,
                width: width as usize,
            }),
            (false, false) => Ok(Self::Variable {
                current_height: PROBE_HEIGHT,
                current_width: PROBE_WIDTH,
                dense_output: false,
            }),
            _ => Err(ConfigError::SpatialShape { height, width }),
        }
    }

    /// `(height, width)` the input buffer has in this mode.
    pub fn extent(&self) -> (usize, usize) {
        match *self {
            Self::Fixed { height, width } => (height, width),
            Self::Variable {
                current_height,
                current_width,
                ..
            } => (current_height, current_width),
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed { .. })
    }

    pub fn is_dense_output(&self) -> bool {
        matches!(self, Self::Variable { dense_output: true, .. })
    }

    pub(crate) fn mark_dense_output(&mut self) {
        if let Self::Variable { dense_output, .. } = self {
            *dense_output = true;
        }
    }

    /// Makes the engine's input extent match `image` (`(height, width)`).
    ///
    /// Fixed networks never reshape. Returns whether a reshape happened; the
    /// caller must then recompute everything derived from output shapes.
    /// The mode only records the new extent once the reshape succeeded, and
    /// a reshape is skipped only when both the mode and the engine already
    /// sit at `image`.
    pub(crate) fn adapt(
        &mut self,
        engine: &mut dyn Engine,
        batch: usize,
        channels: usize,
        image: (usize, usize),
    ) -> Result<bool> {
        let Self::Variable {
            current_height,
            current_width,
            ..
        } = self
        else {
            return Ok(false);
        };
        let [_, _, h, w] = engine.input_shape();
        if (h, w) == image && (*current_height, *current_width) == image {
            return Ok(false);
        }
        debug!("reshape input {}x{} -> {}x{}", current_height, current_width, image.0, image.1);
        engine.reshape([batch, channels, image.0, image.1])?;
        *current_height = image.0;
        *current_width = image.1;
        Ok(true)
    }
}
