//! netfeat CLI - extracts features for the images listed in a runtime config.
//!
//! Usage: `netfeat-cli [runtime.toml]`

use netfeat::start_runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = std::env::args().nth(1).unwrap_or_else(|| "runtime.toml".to_string());
    start_runtime(config).await
}
