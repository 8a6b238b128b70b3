use anyhow::Context;
use flowplane_adsc::{
    config::AdscConfig,
    fleet::Fleet,
    observability::{init_logging, log_config_info},
    APP_NAME, VERSION,
};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AdscConfig::load().context("failed to load configuration")?;

    if !init_logging(&config.logging)? {
        eprintln!("Warning: a tracing subscriber was already installed");
    }

    info!(
        app_name = APP_NAME,
        version = VERSION,
        "Starting ADS load harness"
    );
    log_config_info(&config);

    let fleet = Fleet::new(config).context("invalid fleet configuration")?;
    let cancel = fleet.cancellation_token();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping sessions"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        cancel.cancel();
    });

    let report = fleet.run().await?;
    report.log();

    if report.consistent == Some(false) {
        warn!("Sessions finished with differing resource snapshots");
    }

    Ok(())
}
