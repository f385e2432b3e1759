use crate::host::HostEvent;
use crate::milestone::{Milestone, MilestoneTracker};
use crossbeam_channel::{select, Receiver, Sender};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Map one host notification onto the tracker. Whatever the event, the first one to arrive
/// proves the host is taking calls, so it lifts the state to at least `HostReady`.
pub fn apply_event(tracker: &MilestoneTracker, event: &HostEvent) -> bool {
    let applied = match event {
        HostEvent::SolutionOpened => tracker.advance(Milestone::HostReady, Milestone::ProjectOpened),
        HostEvent::CommandExecuted(id) if id.is_console_ready() => {
            tracker.advance(Milestone::ProjectOpened, Milestone::ConsoleReady)
        }
        HostEvent::CommandExecuted(_) | HostEvent::CommandStarted(_) | HostEvent::HostActivity => {
            false
        }
    };
    applied || tracker.advance(Milestone::NotStarted, Milestone::HostReady)
}

/// Drains the inbound event queue on its own thread so host callbacks never wait on the driver.
pub(super) struct EventPump {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EventPump {
    pub(super) fn spawn(events: Receiver<HostEvent>, tracker: Arc<MilestoneTracker>) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("host-events".to_string())
            .spawn(move || loop {
                select! {
                    recv(events) -> event => match event {
                        Ok(event) => {
                            tracing::trace!(?event, "Host event");
                            apply_event(&tracker, &event);
                        }
                        Err(_) => break,
                    },
                    recv(shutdown_rx) -> _ => break,
                }
            })?;
        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub(super) fn stop(&mut self) {
        // Dropping the sender wakes the pump through a disconnected receive.
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("host event pump panicked");
            }
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}
