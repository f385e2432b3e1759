//! pmcrun entrypoint: start Visual Studio through the automation bridge, run one Package
//! Manager Console command, print what it reported and shut the instance down again.
//!
//! # Threads
//!
//! - Main thread: owns every call into the host and all waits
//! - Bridge reader: delivers host callbacks and call replies
//! - Event pump: turns host callbacks into lifecycle milestones

use anyhow::{Context, Result};
use pmcrun::config::AppConfig;
use pmcrun::host::BridgeConnector;
use pmcrun::telemetry::init_tracing;
use pmcrun::SessionDriver;

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_tracing(&config);

    let connector = BridgeConnector::from_command_line(&config.host_bridge)
        .context("invalid --host-bridge")?;
    let driver = SessionDriver::new(connector, config.driver_config());

    let cancel = driver.cancel_token();
    if let Err(err) = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            eprintln!("pmcrun: second interrupt; exiting without cleanup");
            std::process::exit(130);
        }
        tracing::warn!("Interrupt received; shutting down");
        cancel.cancel();
    }) {
        tracing::warn!("Failed to install Ctrl+C handler: {err}");
    }

    let output = driver.run(&config.run_request())?;
    println!("Completed");
    println!("{}", output.output);
    Ok(())
}
