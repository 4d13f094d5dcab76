use crate::config::parse::load_config;
use crate::pipeline::run_pipeline;
use std::path::PathBuf;
use tracing::{info, warn};

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/sluice/config.yml");
            eprintln!("  /etc/sluice/config.yml");
            eprintln!(
                "\nUse --config <path> to specify a config file, or run 'sluice config init' to generate one."
            );
            std::process::exit(1);
        }
    };

    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(&config_path)?;

    let report = run_pipeline(config).await?;
    if let Some(offsets) = report.uncommitted_offsets().first() {
        warn!(
            batches = report.uncommitted.len(),
            first_uncommitted = %offsets,
            "Some batches will be redelivered on next start"
        );
    }

    Ok(())
}
