pub const DEFAULT_VS_VERSION: &str = "15.0";
pub const DEFAULT_HOST_BRIDGE: &str = "pmc-host-bridge";

pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_MILESTONE_POLL_MS: u64 = 1_000;
pub const DEFAULT_COMPLETION_POLL_MS: u64 = 500;
pub const DEFAULT_REGISTRATION_RETRY_DELAY_MS: u64 = 500;

pub const MIN_INTERVAL_MS: u64 = 1;
pub const MAX_INTERVAL_MS: u64 = 60_000;
