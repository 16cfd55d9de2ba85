use anyhow::Result;
use dotenvy::dotenv;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;

use ytmux::cli::Cli;
use ytmux::core::config::{self, PipelineConfig};
use ytmux::core::{init_logger, log_tool_configuration};
use ytmux::download::identity::IdentityRotator;
use ytmux::download::send::DirectoryDelivery;
use ytmux::{Collaborators, Pipeline};

/// Entry point: runs one request from the command line.
///
/// Exits with 0 when the video was delivered, 1 otherwise.
///
/// # Errors
/// Returns an error if initialization fails (logging, HTTP client).
#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse_args();

    // Load .env before any config static is read
    let _ = dotenv();

    let log_file = cli.log_file.clone().unwrap_or_else(|| config::LOG_FILE_PATH.clone());
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    init_logger(&log_file, level)?;
    log_tool_configuration().await;

    let output_dir = cli.output_dir.clone().unwrap_or_else(|| config::OUTPUT_DIR.clone());
    let collaborators = Collaborators::with_defaults(Arc::new(DirectoryDelivery::new(output_dir)))
        .map_err(|e| anyhow::anyhow!("Failed to set up providers: {}", e))?;
    let pipeline_config = PipelineConfig {
        render_progress: !cli.no_progress,
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(pipeline_config, collaborators, IdentityRotator::shared());
    let request = pipeline.request(cli.command.target());

    // Dropping the run on Ctrl+C kills ffmpeg and removes temp files.
    let outcome = tokio::select! {
        outcome = pipeline.run(request) => outcome,
        _ = signal::ctrl_c() => {
            log::warn!("Interrupted, cleaning up");
            return Ok(ExitCode::from(130));
        }
    };

    log::info!(
        "Finished as {} via [{}]",
        outcome.state,
        outcome
            .transitions
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" → ")
    );

    Ok(if outcome.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
