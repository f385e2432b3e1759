//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::Parser;
use std::path::PathBuf;

pub use defaults::{
    DEFAULT_COMPLETION_POLL_MS, DEFAULT_HOST_BRIDGE, DEFAULT_MILESTONE_POLL_MS,
    DEFAULT_REGISTRATION_RETRY_DELAY_MS, DEFAULT_RETRY_DELAY_MS, DEFAULT_VS_VERSION,
    MAX_INTERVAL_MS, MIN_INTERVAL_MS,
};

/// CLI options for pmcrun.
#[derive(Debug, Parser, Clone)]
#[command(
    about = "Run a Package Manager Console command inside Visual Studio",
    author,
    version,
    after_help = "Example: pmcrun --nugetcommand \"Update-Package Newtonsoft.Json\" --project \"C:\\Foo\\Bar\\foobar.csproj\""
)]
pub struct AppConfig {
    /// The NuGet package management console command to execute
    #[arg(short = 'n', long = "nugetcommand", visible_alias = "command")]
    pub nuget_command: String,

    /// The full path of the project in which to run the command
    #[arg(short = 'p', long = "project")]
    pub project: PathBuf,

    /// The Visual Studio version used for automation
    #[arg(short = 'v', long = "vsversion", default_value = DEFAULT_VS_VERSION)]
    pub vs_version: String,

    /// Print timestamped progress while the host is driven
    #[arg(long = "debug", env = "PMCRUN_DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Append JSON trace events to this file
    #[arg(long = "trace-log", env = "PMCRUN_TRACE_LOG")]
    pub trace_log: Option<PathBuf>,

    /// Command line of the automation bridge that owns the Visual Studio instance
    #[arg(long = "host-bridge", env = "PMCRUN_HOST_BRIDGE", default_value = DEFAULT_HOST_BRIDGE)]
    pub host_bridge: String,

    /// Delay before retrying a call the host asked to retry later (milliseconds)
    #[arg(long = "retry-delay-ms", default_value_t = DEFAULT_RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    /// Interval between lifecycle milestone checks (milliseconds)
    #[arg(long = "milestone-poll-ms", default_value_t = DEFAULT_MILESTONE_POLL_MS)]
    pub milestone_poll_ms: u64,

    /// Interval between completion flag checks (milliseconds)
    #[arg(long = "completion-poll-ms", default_value_t = DEFAULT_COMPLETION_POLL_MS)]
    pub completion_poll_ms: u64,

    /// Delay before retrying session setup after a transient failure (milliseconds)
    #[arg(
        long = "registration-retry-delay-ms",
        default_value_t = DEFAULT_REGISTRATION_RETRY_DELAY_MS
    )]
    pub registration_retry_delay_ms: u64,
}
