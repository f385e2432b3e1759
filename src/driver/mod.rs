//! End-to-end script for one run: acquire the host, wait for each lifecycle milestone before
//! issuing the next command, then collect the console command's output through the hand-off
//! files and tear everything down.

mod context;
mod events;
mod request;
#[cfg(test)]
mod tests;

pub use events::apply_event;
pub use request::{RunRequest, ValidationError};

use crate::call_filter::{self, RetryLaterFilter, RetryPolicy, DEFAULT_RETRY_DELAY};
use crate::cancel::CancelToken;
use crate::handoff::{HandoffError, ResultHandoff};
use crate::host::{
    HostConnector, HostError, HostSession, CMD_OPEN_PROJECT, CMD_PACKAGE_MANAGER_CONSOLE,
};
use crate::milestone::{Milestone, MilestoneTracker, WaitCancelled};
use context::SessionContext;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Poll intervals and delays. Tests shrink them; behavior does not depend on their size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub retry_delay: Duration,
    pub milestone_poll: Duration,
    pub completion_poll: Duration,
    pub setup_retry_delay: Duration,
    /// Upper bound for each teardown call, so an unresponsive host cannot hold the process.
    pub teardown_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            milestone_poll: Duration::from_secs(1),
            completion_poll: Duration::from_millis(500),
            setup_retry_delay: Duration::from_millis(500),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to acquire host session for version {version}: {source}")]
    Acquire {
        version: String,
        #[source]
        source: HostError,
    },
    #[error("failed to register host event callbacks: {0}")]
    Registration(#[source] HostError),
    #[error("host call '{step}' failed: {source}")]
    Call {
        step: &'static str,
        #[source]
        source: HostError,
    },
    #[error("failed to start host event listener: {0}")]
    EventPump(#[source] io::Error),
    #[error(transparent)]
    Handoff(HandoffError),
    #[error("run interrupted{}", interrupted_while(.waiting_for))]
    Cancelled { waiting_for: Option<Milestone> },
}

fn interrupted_while(waiting_for: &Option<Milestone>) -> String {
    waiting_for
        .map(|milestone| format!(" while waiting for {milestone}"))
        .unwrap_or_default()
}

impl From<HandoffError> for DriverError {
    fn from(err: HandoffError) -> Self {
        match err {
            HandoffError::Cancelled => DriverError::Cancelled { waiting_for: None },
            other => DriverError::Handoff(other),
        }
    }
}

impl From<WaitCancelled> for DriverError {
    fn from(err: WaitCancelled) -> Self {
        DriverError::Cancelled {
            waiting_for: Some(err.target),
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Text the console command wrote to its error stream, verbatim.
    pub output: String,
}

pub struct SessionDriver<C: HostConnector> {
    connector: C,
    config: DriverConfig,
    cancel: CancelToken,
}

impl<C: HostConnector> SessionDriver<C> {
    pub fn new(connector: C, config: DriverConfig) -> Self {
        Self {
            connector,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts the run; hand it to the process interrupt handler.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Execute one command end to end. Teardown runs on every path once a session exists.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutput, DriverError> {
        request.validate()?;
        let handoff = ResultHandoff::create()?;
        tracing::debug!(
            flag = %handoff.flag_path().display(),
            output = %handoff.output_path().display(),
            "Created result hand-off"
        );

        let session = self.acquire_session(&request.host_version)?;
        let filter = call_filter::register(Arc::new(RetryLaterFilter::new(RetryPolicy::new(
            self.config.retry_delay,
        ))));
        let tracker = Arc::new(MilestoneTracker::new(self.config.milestone_poll));
        let mut context =
            SessionContext::start(session, filter, tracker, self.config.teardown_timeout)
                .map_err(DriverError::EventPump)?;
        self.register_events(&context)?;

        self.step(&context, "activate main window", |s, c| {
            s.activate_main_window(c)
        })?;

        self.wait_for(&context, Milestone::HostReady)?;
        let project = request.project_path.display().to_string();
        self.step(&context, "open project", |s, c| {
            s.execute_command(CMD_OPEN_PROJECT, Some(&project), c)
        })?;

        self.wait_for(&context, Milestone::ProjectOpened)?;
        self.step(&context, "open package manager console", |s, c| {
            s.execute_command(CMD_PACKAGE_MANAGER_CONSOLE, None, c)
        })?;

        self.wait_for(&context, Milestone::ConsoleReady)?;
        let script = handoff.completion_script(&request.command);
        self.step(&context, "run console command", |s, c| {
            s.execute_command(CMD_PACKAGE_MANAGER_CONSOLE, Some(&script), c)
        })?;

        handoff.wait_for_completion(self.config.completion_poll, &self.cancel)?;
        tracing::info!("Completed");
        let output = handoff.read_output()?;
        context.teardown();
        Ok(RunOutput { output })
    }

    /// Connect to the host, retrying a transient failure once after a short delay.
    fn acquire_session(&self, version: &str) -> Result<C::Session, DriverError> {
        let acquire_err = |source| DriverError::Acquire {
            version: version.to_string(),
            source,
        };
        match self.connector.connect(version) {
            Ok(session) => Ok(session),
            Err(err) if err.is_transient() => {
                tracing::warn!("Exception encountered: {err}");
                if !self.cancel.sleep(self.config.setup_retry_delay) {
                    return Err(DriverError::Cancelled { waiting_for: None });
                }
                self.connector.connect(version).map_err(acquire_err)
            }
            Err(err) => Err(acquire_err(err)),
        }
    }

    /// Hook the host callbacks up to the tracker. A freshly created host sometimes fails the
    /// first registration with a transient error; one retry follows, after which the run fails
    /// instead of waiting on milestones that could never advance.
    fn register_events(&self, context: &SessionContext<C::Session>) -> Result<(), DriverError> {
        let register =
            |s: &C::Session, c: &CancelToken| s.register_events(context.event_sink(), c);
        let err = match context.call("register events", &self.cancel, register) {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(self.host_failure(err, DriverError::Registration)),
        };
        tracing::warn!("Exception encountered: {err}");
        if !self.cancel.sleep(self.config.setup_retry_delay) {
            return Err(DriverError::Cancelled { waiting_for: None });
        }
        context
            .call("register events", &self.cancel, register)
            .map_err(|err| self.host_failure(err, DriverError::Registration))
    }

    fn step(
        &self,
        context: &SessionContext<C::Session>,
        step: &'static str,
        call: impl Fn(&C::Session, &CancelToken) -> Result<(), HostError>,
    ) -> Result<(), DriverError> {
        context.call(step, &self.cancel, call).map_err(|source| {
            self.host_failure(source, |source| DriverError::Call { step, source })
        })
    }

    /// A call cut short by the run's interrupt reports the interrupt, not the host.
    fn host_failure(
        &self,
        source: HostError,
        wrap: impl FnOnce(HostError) -> DriverError,
    ) -> DriverError {
        match source {
            HostError::Interrupted => DriverError::Cancelled { waiting_for: None },
            HostError::CallCanceled(_) if self.cancel.is_cancelled() => {
                DriverError::Cancelled { waiting_for: None }
            }
            source => wrap(source),
        }
    }

    fn wait_for(
        &self,
        context: &SessionContext<C::Session>,
        target: Milestone,
    ) -> Result<(), DriverError> {
        tracing::debug!(%target, "Waiting for milestone");
        context.tracker().wait_for(target, &self.cancel)?;
        Ok(())
    }
}
