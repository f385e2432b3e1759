//! Boundary with the automated IDE. The driver only talks to the host through
//! [`HostConnector`] and [`HostSession`]; lifecycle notifications come back as
//! [`HostEvent`] values pushed into an [`EventSink`] from the host's own callback thread.

mod bridge;
mod ids;
mod protocol;

use crate::cancel::CancelToken;
use crossbeam_channel::{Receiver, SendError, Sender};
use std::fmt;
use thiserror::Error;

pub use bridge::{BridgeConnector, BridgeSession};
pub use ids::{
    CommandId, CMDID_NUGET_SOURCES, CMDID_OUTPUT_PANE_COMBO, GUID_NUGET_CONSOLE_CMD_SET,
    GUID_STD_COMMAND_SET_2K,
};
pub use protocol::{BridgeMessage, BridgeRequest, EventPayload, ReplyStatus, RequestOp};

/// Host command that shows the package manager console, and that also accepts console input.
pub const CMD_PACKAGE_MANAGER_CONSOLE: &str = "View.PackageManagerConsole";
/// Host command that opens a project file.
pub const CMD_OPEN_PROJECT: &str = "File.OpenProject";

/// Notifications the host delivers asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Some callback fired without a more specific meaning.
    HostActivity,
    SolutionOpened,
    CommandStarted(CommandId),
    CommandExecuted(CommandId),
}

/// Why the host refused an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectType {
    /// The callee is too busy; retrying is pointless.
    Rejected,
    /// The callee asked to be called again later.
    RetryLater,
    Other(i32),
}

impl RejectType {
    pub const RAW_REJECTED: i32 = 1;
    pub const RAW_RETRY_LATER: i32 = 2;

    pub fn from_raw(raw: i32) -> Self {
        match raw {
            Self::RAW_REJECTED => RejectType::Rejected,
            Self::RAW_RETRY_LATER => RejectType::RetryLater,
            other => RejectType::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            RejectType::Rejected => Self::RAW_REJECTED,
            RejectType::RetryLater => Self::RAW_RETRY_LATER,
            RejectType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for RejectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectType::Rejected => write!(f, "rejected ({})", self.as_raw()),
            RejectType::RetryLater => write!(f, "retry later ({})", self.as_raw()),
            RejectType::Other(raw) => write!(f, "reject type {raw}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host rejected the call: {0}")]
    Rejected(RejectType),
    #[error("call canceled after host rejection: {0}")]
    CallCanceled(RejectType),
    #[error("transient host failure: {0}")]
    Transient(String),
    #[error("host unavailable: {0}")]
    Unavailable(String),
    #[error("host connection closed")]
    Disconnected,
    #[error("stopped waiting for the host to answer")]
    Interrupted,
    #[error("host protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Failures worth one more attempt at session setup.
    pub fn is_transient(&self) -> bool {
        matches!(self, HostError::Transient(_) | HostError::Rejected(_))
    }
}

/// Sending half handed to the host at registration time.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: Sender<HostEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<HostEvent>) -> Self {
        Self { tx }
    }

    /// Deliver one notification. Fails only once the driver stopped listening.
    pub fn send(&self, event: HostEvent) -> Result<(), SendError<HostEvent>> {
        self.tx.send(event)
    }
}

/// Create a connected sink/receiver pair.
pub fn event_channel() -> (EventSink, Receiver<HostEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (EventSink::new(tx), rx)
}

/// Acquires a live host instance for one run.
pub trait HostConnector: Send + Sync {
    type Session: HostSession + 'static;

    fn connect(&self, version: &str) -> Result<Self::Session, HostError>;
}

/// One live host instance. Every method is an outbound call and may be rejected with
/// [`HostError::Rejected`]; callers go through the call filter to get retry behavior.
/// A call still waiting on the host when `cancel` fires gives up with
/// [`HostError::Interrupted`].
pub trait HostSession: Send + Sync {
    fn register_events(&self, sink: EventSink, cancel: &CancelToken) -> Result<(), HostError>;
    fn activate_main_window(&self, cancel: &CancelToken) -> Result<(), HostError>;
    /// Fire-and-forget: returns once the host accepted the command, not when it finished.
    fn execute_command(
        &self,
        name: &str,
        args: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<(), HostError>;
    fn close_solution(&self, cancel: &CancelToken) -> Result<(), HostError>;
    fn quit(&self, cancel: &CancelToken) -> Result<(), HostError>;
}
