use super::defaults::{MAX_INTERVAL_MS, MIN_INTERVAL_MS};
use super::AppConfig;
use crate::driver::{DriverConfig, RunRequest};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{env, time::Duration};

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize the project path.
    pub fn validate(&mut self) -> Result<()> {
        for (flag, value) in [
            ("--retry-delay-ms", self.retry_delay_ms),
            ("--milestone-poll-ms", self.milestone_poll_ms),
            ("--completion-poll-ms", self.completion_poll_ms),
            (
                "--registration-retry-delay-ms",
                self.registration_retry_delay_ms,
            ),
        ] {
            if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&value) {
                bail!("{flag} must be between {MIN_INTERVAL_MS} and {MAX_INTERVAL_MS}, got {value}");
            }
        }

        let bridge = shell_words::split(&self.host_bridge)
            .with_context(|| format!("--host-bridge '{}' is not a valid command line", self.host_bridge))?;
        if bridge.is_empty() {
            bail!("--host-bridge cannot be empty");
        }

        self.vs_version = self.vs_version.trim().to_string();

        // The host runs with its own working directory, so hand it an absolute path.
        if self.project.is_relative() && !self.project.as_os_str().is_empty() {
            let cwd = env::current_dir().context("failed to resolve the current directory")?;
            self.project = cwd.join(&self.project);
        }

        self.run_request().validate()?;
        Ok(())
    }

    pub fn run_request(&self) -> RunRequest {
        RunRequest::new(
            self.nuget_command.clone(),
            self.project.clone(),
            self.vs_version.clone(),
        )
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            milestone_poll: Duration::from_millis(self.milestone_poll_ms),
            completion_poll: Duration::from_millis(self.completion_poll_ms),
            setup_retry_delay: Duration::from_millis(self.registration_retry_delay_ms),
            ..DriverConfig::default()
        }
    }
}
