//! Reentrancy and retry policy for outbound calls into the host.
//!
//! An out-of-process host can refuse a call while it is busy. The installed filter decides
//! whether such a refusal is retried after a short delay or cancels the call, and it answers
//! the host's own calls that arrive while the driver is blocked. Registration is scoped to the
//! thread that issues host calls and released by [`FilterRegistration`] on every exit path.

#[cfg(test)]
mod tests;

use crate::cancel::CancelToken;
use crate::host::{HostError, RejectType};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Answer to a call the host makes into us. The variants follow the host's code table
/// (0, 1, 2); the built-in filter only ever answers `Handled`, other [`MessageFilter`]
/// implementations may pick the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingCallResponse {
    Handled,
    Rejected,
    RetryLater,
}

impl IncomingCallResponse {
    pub fn as_raw(self) -> i32 {
        match self {
            IncomingCallResponse::Handled => 0,
            IncomingCallResponse::Rejected => 1,
            IncomingCallResponse::RetryLater => 2,
        }
    }
}

/// What to do after the host refused one of our calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    Cancel,
}

impl RetryDecision {
    /// Delay in milliseconds, or -1 to cancel.
    pub fn as_raw(self) -> i32 {
        match self {
            RetryDecision::RetryAfter(delay) => {
                i32::try_from(delay.as_millis()).unwrap_or(i32::MAX)
            }
            RetryDecision::Cancel => -1,
        }
    }
}

/// How to treat a window message that arrives while an outbound call is pending.
/// Same code table as the host (0, 1, 2); the built-in filter answers `WaitDefProcess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingMessageResponse {
    CancelCall,
    WaitNoProcess,
    WaitDefProcess,
}

impl PendingMessageResponse {
    pub fn as_raw(self) -> i32 {
        match self {
            PendingMessageResponse::CancelCall => 0,
            PendingMessageResponse::WaitNoProcess => 1,
            PendingMessageResponse::WaitDefProcess => 2,
        }
    }
}

pub trait MessageFilter: Send + Sync {
    fn handle_incoming_call(&self, call_type: i32) -> IncomingCallResponse;
    fn retry_rejected_call(&self, reject: RejectType, elapsed: Duration) -> RetryDecision;
    fn message_pending(&self, pending_type: i32) -> PendingMessageResponse;
}

/// Fixed-delay, unbounded retry for "retry later"; everything else cancels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn classify(&self, reject: RejectType) -> RetryDecision {
        match reject {
            RejectType::RetryLater => RetryDecision::RetryAfter(self.retry_delay),
            RejectType::Rejected | RejectType::Other(_) => RetryDecision::Cancel,
        }
    }
}

/// The filter installed for a driver run.
#[derive(Debug, Clone, Default)]
pub struct RetryLaterFilter {
    policy: RetryPolicy,
}

impl RetryLaterFilter {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl MessageFilter for RetryLaterFilter {
    fn handle_incoming_call(&self, _call_type: i32) -> IncomingCallResponse {
        IncomingCallResponse::Handled
    }

    fn retry_rejected_call(&self, reject: RejectType, _elapsed: Duration) -> RetryDecision {
        tracing::info!("Got rejected call: {}", reject.as_raw());
        self.policy.classify(reject)
    }

    fn message_pending(&self, _pending_type: i32) -> PendingMessageResponse {
        PendingMessageResponse::WaitDefProcess
    }
}

thread_local! {
    static ACTIVE_FILTER: RefCell<Option<Arc<dyn MessageFilter>>> = const { RefCell::new(None) };
}

/// Install `filter` for the current thread. A second install while one is active is a no-op
/// and hands back a registration that does not own the slot.
pub fn register(filter: Arc<dyn MessageFilter>) -> FilterRegistration {
    let owner = ACTIVE_FILTER.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return false;
        }
        *slot = Some(filter);
        true
    });
    if owner {
        tracing::info!("Registering message filter");
    } else {
        tracing::debug!("Message filter already registered on this thread");
    }
    FilterRegistration {
        owner,
        _thread_bound: PhantomData,
    }
}

pub fn is_registered() -> bool {
    ACTIVE_FILTER.with(|slot| slot.borrow().is_some())
}

fn active_filter() -> Option<Arc<dyn MessageFilter>> {
    ACTIVE_FILTER.with(|slot| slot.borrow().clone())
}

/// Scoped ownership of the thread's filter slot. Revokes on drop.
#[must_use = "dropping the registration revokes the filter"]
pub struct FilterRegistration {
    owner: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl FilterRegistration {
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Remove the filter. Only the owning registration clears the slot, and only once.
    pub fn revoke(&mut self) -> bool {
        if !std::mem::take(&mut self.owner) {
            return false;
        }
        ACTIVE_FILTER.with(|slot| slot.borrow_mut().take());
        tracing::info!("Revoked message filter");
        true
    }
}

impl Drop for FilterRegistration {
    fn drop(&mut self) {
        self.revoke();
    }
}

/// Answer a host call that arrived while we are blocked in an outbound call.
pub fn handle_incoming_call(call_type: i32) -> IncomingCallResponse {
    active_filter()
        .map(|filter| filter.handle_incoming_call(call_type))
        .unwrap_or(IncomingCallResponse::Handled)
}

/// Answer a pending window message that arrived during an outbound call.
pub fn message_pending(pending_type: i32) -> PendingMessageResponse {
    active_filter()
        .map(|filter| filter.message_pending(pending_type))
        .unwrap_or(PendingMessageResponse::WaitDefProcess)
}

/// Run one outbound call, applying the installed filter to rejections. Retries continue
/// until the call goes through, the filter cancels it, or `cancel` fires during a backoff.
/// Without an installed filter a rejection is returned unchanged.
pub fn invoke_with_filter<T>(
    what: &str,
    cancel: &CancelToken,
    mut call: impl FnMut() -> Result<T, HostError>,
) -> Result<T, HostError> {
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let reject = match call() {
            Err(HostError::Rejected(reject)) => reject,
            other => return other,
        };
        let Some(filter) = active_filter() else {
            return Err(HostError::Rejected(reject));
        };
        match filter.retry_rejected_call(reject, started.elapsed()) {
            RetryDecision::RetryAfter(delay) => {
                tracing::debug!(call = what, attempt, ?delay, "Retrying rejected call");
                if !cancel.sleep(delay) {
                    return Err(HostError::CallCanceled(reject));
                }
            }
            RetryDecision::Cancel => {
                tracing::warn!(call = what, attempt, "Host too busy; canceling call");
                return Err(HostError::CallCanceled(reject));
            }
        }
    }
}
