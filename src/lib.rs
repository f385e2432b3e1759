pub mod call_filter;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod handoff;
pub mod host;
mod lock;
pub mod milestone;
pub mod telemetry;

pub(crate) use lock::lock_or_recover;
pub use cancel::CancelToken;
pub use driver::{DriverConfig, DriverError, RunOutput, RunRequest, SessionDriver};
pub use milestone::{Milestone, MilestoneTracker};
