//! netfeat: feature extraction over pretrained image networks.
//!
//! Load a model directory with [`Extractor::open`], then feed images through
//! [`Extractor::apply`] or [`Extractor::apply_batch`] to get flat feature
//! vectors. [`start_runtime`] wraps one extractor in a queued worker for
//! command-line use.

pub mod aliasing;
pub mod batcher;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod imaging;
pub mod mean;
pub mod model;
pub mod outputs;
pub mod preprocess;
pub mod shape;
pub mod types;
pub mod worker;

pub use error::{ConfigError, ExtractError, UsageError};
pub use extractor::Extractor;
pub use imaging::Image;
pub use model::EngineConfig;
pub use outputs::{FeatureTable, FeatureVector, OutputDescriptor};
pub use shape::SpatialMode;
pub use types::{ChannelOrder, Config, FeatureRecord, ModelOptions};

use crate::types::Job;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Runs the extraction service described by a runtime config file.
///
/// Every listed image is decoded, queued and answered by a single worker;
/// records are written as JSON lines to the configured output or stdout.
pub async fn start_runtime(config_path: impl AsRef<Path>) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();

    let config_path = config_path.as_ref();
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let cfg: Config = toml::from_str(&text)?;

    let extractor = Extractor::open(&cfg.model.dir, cfg.model.batch)?;
    info!(
        "runtime: model={}, batch={}, dim={}, images={}",
        cfg.model.dir.display(),
        extractor.batch_capacity(),
        extractor.feature_dim(),
        cfg.input.images.len()
    );
    let order = extractor.channel_order();

    let (tx, rx) = mpsc::channel::<Job>(1024);
    let worker = tokio::spawn(worker::run_worker(extractor, rx, cfg.queue.clone()));

    let mut pending = Vec::with_capacity(cfg.input.images.len());
    for path in &cfg.input.images {
        let image = match ::image::open(path) {
            Ok(decoded) => Image::from_dynamic(&decoded, order)?,
            Err(e) => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let (reply, answer) = oneshot::channel();
        let id = path.display().to_string();
        tx.send(Job { id: id.clone(), image, reply }).await?;
        pending.push((id, answer));
    }
    drop(tx);

    let mut out: Box<dyn Write + Send> = match &cfg.output.path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    };
    let mut written = 0usize;
    for (id, answer) in pending {
        match answer.await {
            Ok(Ok(record)) => {
                worker::write_record(&mut out, &record)?;
                written += 1;
            }
            Ok(Err(e)) => warn!("{}: {}", id, e),
            Err(_) => warn!("{}: worker dropped the job", id),
        }
    }
    out.flush()?;

    worker.await??;
    info!("wrote {} record(s)", written);
    Ok(())
}
