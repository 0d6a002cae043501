//! Error taxonomy for the extractor.
//!
//! Construction problems are [`ConfigError`]s and never yield an extractor.
//! Per-call problems the caller can fix are [`UsageError`]s; everything a
//! call can fail with is wrapped in [`ExtractError`].

use std::path::PathBuf;
use thiserror::Error;

/// Boxed source error used to carry backend (`anyhow`) failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while loading a model directory.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("batch capacity must be at least 1")]
    InvalidBatch,

    #[error("required model file is missing: {path}")]
    MissingFile { path: PathBuf },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid options file {path}")]
    Options {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to load network")]
    Network {
        #[source]
        source: BoxError,
    },

    #[error("network should have exactly one input, found {found}")]
    InputCount { found: usize },

    #[error("network input should be 4D (NCHW), declared shape is {shape:?}")]
    InputRank { shape: Vec<i64> },

    #[error("input layer should have 1 or 3 channels, found {found}")]
    ChannelCount { found: i64 },

    #[error("input spatial size {height}x{width} is neither fixed nor a placeholder")]
    SpatialShape { height: i64, width: i64 },

    #[error("mean file provides {found} channels, network expects {expected}")]
    MeanChannels { expected: usize, found: usize },

    #[error("output manifest {path} lists no outputs")]
    EmptyManifest { path: PathBuf },

    #[error("output '{name}' listed in the manifest is not produced by the network")]
    UnknownOutput { name: String },
}

impl ConfigError {
    pub(crate) fn network(err: anyhow::Error) -> Self {
        Self::Network { source: err.into() }
    }
}

/// Caller-correctable errors reported by a single extraction call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("must input at least one image")]
    EmptyBatch,

    #[error("too many input images: {requested} exceeds batch capacity {capacity}")]
    BatchTooLarge { requested: usize, capacity: usize },

    #[error(
        "all images must be the same size: image {index} is {found:?}, expected {expected:?}"
    )]
    NonUniformSize {
        index: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("image of size {found:?} does not fit the input extent {expected:?}")]
    ExtentMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("input channels are not wrapping the input layer of the network")]
    AliasingBroken,
}

/// An output named in the manifest that the network did not produce.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("output '{0}' is not produced by the network")]
pub struct MissingOutput(pub String);

impl From<MissingOutput> for ConfigError {
    fn from(err: MissingOutput) -> Self {
        ConfigError::UnknownOutput { name: err.0 }
    }
}

/// Everything an `apply` call can fail with.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("inference failed")]
    Engine {
        #[source]
        source: BoxError,
    },
}

impl ExtractError {
    pub(crate) fn engine(err: anyhow::Error) -> Self {
        Self::Engine { source: err.into() }
    }

    /// Returns the usage error, if this failure was caused by the caller.
    pub fn as_usage(&self) -> Option<&UsageError> {
        match self {
            Self::Usage(e) => Some(e),
            Self::Engine { .. } => None,
        }
    }
}

impl From<MissingOutput> for ExtractError {
    fn from(err: MissingOutput) -> Self {
        Self::Engine { source: Box::new(err) }
    }
}
