use crate::config::AppConfig;
use std::fs::OpenOptions;
use std::io;
use std::sync::{Mutex, OnceLock};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Human-readable progress goes to stderr; stdout carries the run result.
/// `--debug` lowers the level to DEBUG; `--trace-log` adds a JSON copy of every event.
pub fn init_tracing(config: &AppConfig) {
    let _ = TRACING_INIT.get_or_init(|| {
        let level = if config.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let console = tracing_subscriber::fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .with_writer(io::stderr);
        let trace_file = config.trace_log.as_ref().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(err) => {
                    eprintln!("pmcrun: cannot open trace log '{}': {err}", path.display());
                    None
                }
            }
        });
        let json = trace_file.map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(Mutex::new(file))
                .with_current_span(false)
                .with_span_list(false)
        });
        let subscriber = tracing_subscriber::registry()
            .with(level)
            .with(console)
            .with(json);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
