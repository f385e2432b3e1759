//! Newline-delimited JSON spoken with the automation bridge process.

use serde::{Deserialize, Serialize};

// ============================================================================
// Requests (driver → bridge)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub seq: u64,
    #[serde(flatten)]
    pub op: RequestOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestOp {
    RegisterEvents,
    ActivateMainWindow,
    ExecuteCommand {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<String>,
    },
    CloseSolution,
    Quit,
    /// Answer to an `incoming_call` or `message_pending` message, sent with the `seq` of the
    /// call that was blocked. Not acknowledged.
    FilterResponse { code: i32 },
}

impl RequestOp {
    pub fn name(&self) -> &'static str {
        match self {
            RequestOp::RegisterEvents => "register_events",
            RequestOp::ActivateMainWindow => "activate_main_window",
            RequestOp::ExecuteCommand { .. } => "execute_command",
            RequestOp::CloseSolution => "close_solution",
            RequestOp::Quit => "quit",
            RequestOp::FilterResponse { .. } => "filter_response",
        }
    }
}

// ============================================================================
// Messages (bridge → driver)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    /// Answer to the request carrying the same `seq`.
    Reply {
        seq: u64,
        status: ReplyStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reject_type: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default)]
        transient: bool,
    },
    /// Host callback.
    Event(EventPayload),
    /// The host is calling back into us while our outbound call is blocked.
    IncomingCall { call_type: i32 },
    /// A window message arrived while our outbound call is blocked.
    MessagePending { pending_type: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventPayload {
    SolutionOpened,
    CommandBeforeExecute {
        guid: String,
        id: i32,
        #[serde(default)]
        custom_in: Option<String>,
        #[serde(default)]
        custom_out: Option<String>,
    },
    CommandAfterExecute {
        guid: String,
        id: i32,
        #[serde(default)]
        custom_in: Option<String>,
        #[serde(default)]
        custom_out: Option<String>,
    },
    #[serde(other)]
    Unknown,
}
