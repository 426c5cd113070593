//! Kiln conversion server.
//!
//! HTTP frontend for converting browser-trained classifier bundles into
//! deployable artifacts: Keras, SavedModel, TFLite (float or quantized),
//! Edge TPU, or a microcontroller source sketch.

mod handlers;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kiln_core::config::ServerConfig;
use kiln_core::{ConversionPipeline, PythonEngine};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "kiln-server")]
#[command(about = "Conversion server for browser-trained classifier models")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Directory holding the engine scripts and virtual environment
    #[arg(long, default_value = "./kiln-data")]
    data_root: PathBuf,

    /// Pretrained audio preprocessing SavedModel directory
    #[arg(long, default_value = "./sc_preproc_model")]
    preproc_model: PathBuf,

    /// Maximum upload size in megabytes
    #[arg(long, default_value_t = ServerConfig::DEFAULT_BODY_LIMIT_BYTES / (1024 * 1024))]
    max_upload_mb: usize,

    /// Skip conversion-environment setup at startup
    #[arg(long)]
    skip_setup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Starting kiln conversion server");

    let engine = PythonEngine::new(&args.data_root, &args.preproc_model);
    if args.skip_setup {
        info!("Skipping conversion-environment setup (--skip-setup)");
    } else if let Err(e) = engine.ensure_environment().await {
        // The server still boots; requests will fail individually until the
        // environment is repaired.
        warn!("Conversion environment setup failed: {e}");
    }
    if !engine.has_preproc_model() {
        warn!(
            "Audio preprocessing model not found at {} - audio conversions will fail",
            args.preproc_model.display()
        );
    }

    let pipeline = ConversionPipeline::new(Arc::new(engine));
    let addr = server::start_server(
        pipeline,
        &args.host,
        args.port,
        args.max_upload_mb * 1024 * 1024,
    )
    .await?;

    info!("Conversion server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
