use super::events::EventPump;
use crate::call_filter::{self, FilterRegistration};
use crate::cancel::CancelToken;
use crate::host::{self, EventSink, HostError, HostSession};
use crate::milestone::MilestoneTracker;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Everything that lives for exactly one session: the host handle, the tracker fed by host
/// callbacks, the pump that feeds it, and the filter registration. Teardown runs once, either
/// explicitly on success or from `Drop` on any early return.
pub(super) struct SessionContext<S: HostSession> {
    session: S,
    tracker: Arc<MilestoneTracker>,
    sink: EventSink,
    pump: EventPump,
    filter: FilterRegistration,
    teardown_timeout: Duration,
    torn_down: bool,
}

impl<S: HostSession> SessionContext<S> {
    pub(super) fn start(
        session: S,
        filter: FilterRegistration,
        tracker: Arc<MilestoneTracker>,
        teardown_timeout: Duration,
    ) -> io::Result<Self> {
        let (sink, events) = host::event_channel();
        let pump = EventPump::spawn(events, Arc::clone(&tracker))?;
        Ok(Self {
            session,
            tracker,
            sink,
            pump,
            filter,
            teardown_timeout,
            torn_down: false,
        })
    }

    pub(super) fn tracker(&self) -> &MilestoneTracker {
        &self.tracker
    }

    pub(super) fn event_sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Issue one outbound call under the registered filter. `cancel` interrupts both the
    /// backoff between retries and the wait for the host's answer.
    pub(super) fn call<T>(
        &self,
        what: &str,
        cancel: &CancelToken,
        call: impl Fn(&S, &CancelToken) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        tracing::debug!(call = what, "Calling host");
        call_filter::invoke_with_filter(what, cancel, || call(&self.session, cancel))
    }

    /// Close the solution, quit the host, stop the event pump and revoke the filter.
    /// Failures are logged; teardown never fails the run on its own.
    pub(super) fn teardown(&mut self) -> bool {
        if std::mem::replace(&mut self.torn_down, true) {
            return false;
        }
        tracing::debug!("Tearing down host session");
        // Own deadline per call: the run token may already be cancelled, and a host that keeps
        // rejecting or never answers must not hold the process.
        let cancel = CancelToken::with_timeout(self.teardown_timeout);
        if let Err(err) = self.call("close solution", &cancel, |s, c| s.close_solution(c)) {
            tracing::warn!("Failed to close solution: {err}");
        }
        let cancel = CancelToken::with_timeout(self.teardown_timeout);
        if let Err(err) = self.call("quit", &cancel, |s, c| s.quit(c)) {
            tracing::warn!("Failed to quit host: {err}");
        }
        self.pump.stop();
        self.filter.revoke();
        true
    }
}

impl<S: HostSession> Drop for SessionContext<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
