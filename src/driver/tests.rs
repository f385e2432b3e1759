use super::*;
use crate::host::{
    CommandId, EventSink, HostEvent, RejectType, CMDID_OUTPUT_PANE_COMBO,
    GUID_STD_COMMAND_SET_2K,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Activate,
    Execute(String, Option<String>),
}

#[derive(Clone)]
struct Script {
    console_ready: bool,
    sync_events: bool,
    retry_later_on_open: usize,
    too_busy_on_console: bool,
    failed_registrations: usize,
    fatal_registration: bool,
    hang_on_activate: bool,
    hang_on_teardown: bool,
    transient_connects: usize,
    write_output: bool,
    output: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            console_ready: true,
            sync_events: false,
            retry_later_on_open: 0,
            too_busy_on_console: false,
            failed_registrations: 0,
            fatal_registration: false,
            hang_on_activate: false,
            hang_on_teardown: false,
            transient_connects: 0,
            write_output: true,
            output: "Successfully installed 'Newtonsoft.Json 13.0.3'\r\n".to_string(),
        }
    }
}

/// Scripted host. Callbacks fire from separate threads unless `sync_events` is set, in which
/// case they land before the triggering call even returns.
#[derive(Default)]
struct FakeHost {
    script: Script,
    calls: Mutex<Vec<Call>>,
    sink: Mutex<Option<EventSink>>,
    connects: AtomicUsize,
    registrations: AtomicUsize,
    rejections: AtomicUsize,
    closes: AtomicUsize,
    quits: AtomicUsize,
    flag_before_done: Mutex<Vec<String>>,
    notifiers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl FakeHost {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            ..Self::default()
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn emit(&self, events: Vec<HostEvent>) {
        let Some(sink) = self.sink.lock().unwrap().clone() else {
            return;
        };
        if self.script.sync_events {
            for event in events {
                let _ = sink.send(event);
            }
            return;
        }
        let handle = thread::spawn(move || {
            for event in events {
                thread::sleep(Duration::from_millis(5));
                let _ = sink.send(event);
            }
        });
        self.notifiers.lock().unwrap().push(handle);
    }

    fn finish_console_command(&self, script: &str) {
        let output = quoted_after(script, "$error > ").expect("output path in script");
        let flag = quoted_after(script, "\"False\" > ").expect("flag path in script");
        let body = self.script.output.clone();
        let write_output = self.script.write_output;
        let before = fs::read_to_string(&flag).unwrap_or_default();
        self.flag_before_done.lock().unwrap().push(before);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            if write_output {
                fs::write(&output, body).unwrap();
            } else {
                let _ = fs::remove_file(&output);
            }
            fs::write(&flag, "False\r\n").unwrap();
        });
        self.notifiers.lock().unwrap().push(handle);
    }
}

/// Behave like a host that never answers: block until the caller gives up.
fn never_answer(cancel: &CancelToken) -> Result<(), HostError> {
    while !cancel.is_cancelled() {
        thread::sleep(Duration::from_millis(5));
    }
    Err(HostError::Interrupted)
}

fn quoted_after(script: &str, marker: &str) -> Option<PathBuf> {
    let start = script.find(marker)? + marker.len();
    let rest = script[start..].strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(PathBuf::from(&rest[..end]))
}

fn host_activity() -> HostEvent {
    HostEvent::CommandExecuted(CommandId::new(
        GUID_STD_COMMAND_SET_2K,
        CMDID_OUTPUT_PANE_COMBO,
    ))
}

struct FakeConnector(Arc<FakeHost>);
struct FakeSession(Arc<FakeHost>);

impl HostConnector for FakeConnector {
    type Session = FakeSession;

    fn connect(&self, version: &str) -> Result<FakeSession, HostError> {
        assert_eq!(version, "15.0");
        let attempt = self.0.connects.fetch_add(1, Ordering::SeqCst);
        if attempt < self.0.script.transient_connects {
            return Err(HostError::Transient("server execution failed".into()));
        }
        Ok(FakeSession(Arc::clone(&self.0)))
    }
}

impl HostSession for FakeSession {
    fn register_events(&self, sink: EventSink, _cancel: &CancelToken) -> Result<(), HostError> {
        let attempt = self.0.registrations.fetch_add(1, Ordering::SeqCst);
        if self.0.script.fatal_registration {
            return Err(HostError::Protocol("event source not supported".into()));
        }
        if attempt < self.0.script.failed_registrations {
            return Err(HostError::Transient("call was rejected by callee".into()));
        }
        *self.0.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn activate_main_window(&self, cancel: &CancelToken) -> Result<(), HostError> {
        self.0.calls.lock().unwrap().push(Call::Activate);
        if self.0.script.hang_on_activate {
            return never_answer(cancel);
        }
        self.0.emit(vec![host_activity()]);
        Ok(())
    }

    fn execute_command(
        &self,
        name: &str,
        args: Option<&str>,
        _cancel: &CancelToken,
    ) -> Result<(), HostError> {
        let host = &self.0;
        match (name, args) {
            (CMD_OPEN_PROJECT, _) => {
                if host.rejections.load(Ordering::SeqCst) < host.script.retry_later_on_open {
                    host.rejections.fetch_add(1, Ordering::SeqCst);
                    return Err(HostError::Rejected(RejectType::RetryLater));
                }
                host.emit(vec![HostEvent::SolutionOpened, HostEvent::SolutionOpened]);
            }
            (CMD_PACKAGE_MANAGER_CONSOLE, None) => {
                if host.script.too_busy_on_console {
                    host.rejections.fetch_add(1, Ordering::SeqCst);
                    return Err(HostError::Rejected(RejectType::Rejected));
                }
                if host.script.console_ready {
                    host.emit(vec![
                        host_activity(),
                        HostEvent::CommandExecuted(CommandId::nuget_sources()),
                    ]);
                }
            }
            (CMD_PACKAGE_MANAGER_CONSOLE, Some(script)) => host.finish_console_command(script),
            _ => {}
        }
        host.calls
            .lock()
            .unwrap()
            .push(Call::Execute(name.to_string(), args.map(str::to_string)));
        Ok(())
    }

    fn close_solution(&self, cancel: &CancelToken) -> Result<(), HostError> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        if self.0.script.hang_on_teardown {
            return never_answer(cancel);
        }
        Ok(())
    }

    fn quit(&self, cancel: &CancelToken) -> Result<(), HostError> {
        self.0.quits.fetch_add(1, Ordering::SeqCst);
        if self.0.script.hang_on_teardown {
            return never_answer(cancel);
        }
        let handles: Vec<_> = self.0.notifiers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn fast_config() -> DriverConfig {
    DriverConfig {
        retry_delay: Duration::from_millis(20),
        milestone_poll: Duration::from_millis(5),
        completion_poll: Duration::from_millis(5),
        setup_retry_delay: Duration::from_millis(5),
        teardown_timeout: Duration::from_millis(100),
    }
}

fn project_fixture() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("App.csproj");
    fs::write(&project, "<Project />").unwrap();
    (dir, project)
}

fn request_for(project: &Path) -> RunRequest {
    RunRequest::new("Update-Package Newtonsoft.Json", project, "15.0")
}

fn driver_for(host: &Arc<FakeHost>) -> SessionDriver<FakeConnector> {
    SessionDriver::new(FakeConnector(Arc::clone(host)), fast_config())
}

#[test]
fn run_issues_ordered_calls_and_echoes_output() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script::default());
    let output = driver_for(&host).run(&request_for(&project)).unwrap();

    assert_eq!(output.output, host.script.output);
    let calls = host.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0], Call::Activate);
    assert_eq!(
        calls[1],
        Call::Execute(
            CMD_OPEN_PROJECT.to_string(),
            Some(project.display().to_string())
        )
    );
    assert_eq!(
        calls[2],
        Call::Execute(CMD_PACKAGE_MANAGER_CONSOLE.to_string(), None)
    );
    let Call::Execute(name, Some(script)) = &calls[3] else {
        panic!("expected console command, got {:?}", calls[3]);
    };
    assert_eq!(name, CMD_PACKAGE_MANAGER_CONSOLE);
    assert!(script.starts_with("Update-Package Newtonsoft.Json; $error > '"));

    assert_eq!(*host.flag_before_done.lock().unwrap(), vec!["True\n"]);
    assert_eq!(host.closes.load(Ordering::SeqCst), 1);
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
    assert!(!call_filter::is_registered());
}

#[test]
fn events_that_fire_before_the_wait_are_not_lost() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        sync_events: true,
        ..Script::default()
    });
    let output = driver_for(&host).run(&request_for(&project)).unwrap();
    assert_eq!(output.output, host.script.output);
    assert_eq!(host.calls().len(), 4);
}

#[test]
fn missing_project_fails_before_any_host_call() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("Missing.csproj");
    let host = FakeHost::new(Script::default());
    let err = driver_for(&host).run(&request_for(&missing)).unwrap_err();

    assert!(matches!(
        err,
        DriverError::Validation(ValidationError::ProjectNotFound(ref path)) if path == &missing
    ));
    assert!(err.to_string().ends_with("was not found."));
    assert_eq!(host.connects.load(Ordering::SeqCst), 0);
    assert!(host.calls().is_empty());
}

#[test]
fn blank_command_is_rejected() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script::default());
    let err = driver_for(&host)
        .run(&RunRequest::new("   ", &project, "15.0"))
        .unwrap_err();
    assert!(matches!(
        err,
        DriverError::Validation(ValidationError::EmptyCommand)
    ));
    assert_eq!(host.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn hung_console_waits_until_cancelled_then_tears_down() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        console_ready: false,
        ..Script::default()
    });
    let driver = driver_for(&host);
    let cancel = driver.cancel_token();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        cancel.cancel();
    });

    let started = Instant::now();
    let err = driver.run(&request_for(&project)).unwrap_err();
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert!(matches!(
        err,
        DriverError::Cancelled {
            waiting_for: Some(Milestone::ConsoleReady)
        }
    ));
    assert_eq!(host.calls().len(), 3);
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
    assert!(!call_filter::is_registered());
    interrupter.join().unwrap();
}

#[test]
fn retry_later_rejections_are_retried_with_backoff() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        retry_later_on_open: 2,
        ..Script::default()
    });
    let started = Instant::now();
    let output = driver_for(&host).run(&request_for(&project)).unwrap();

    assert_eq!(output.output, host.script.output);
    assert_eq!(host.rejections.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(host.calls().len(), 4);
}

#[test]
fn too_busy_rejection_aborts_run_but_still_tears_down() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        too_busy_on_console: true,
        ..Script::default()
    });
    let err = driver_for(&host).run(&request_for(&project)).unwrap_err();

    assert!(matches!(
        err,
        DriverError::Call {
            step: "open package manager console",
            source: HostError::CallCanceled(RejectType::Rejected),
        }
    ));
    assert_eq!(host.rejections.load(Ordering::SeqCst), 1);
    assert_eq!(host.calls().len(), 2);
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
    assert!(!call_filter::is_registered());
}

#[test]
fn event_registration_is_retried_once() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        failed_registrations: 1,
        ..Script::default()
    });
    driver_for(&host).run(&request_for(&project)).unwrap();
    assert_eq!(host.registrations.load(Ordering::SeqCst), 2);
}

#[test]
fn second_registration_failure_fails_the_run() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        failed_registrations: 2,
        ..Script::default()
    });
    let err = driver_for(&host).run(&request_for(&project)).unwrap_err();
    assert!(matches!(err, DriverError::Registration(_)));
    assert_eq!(host.registrations.load(Ordering::SeqCst), 2);
    assert!(host.calls().is_empty());
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
}

#[test]
fn non_transient_registration_failure_is_not_retried() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        fatal_registration: true,
        ..Script::default()
    });
    let err = driver_for(&host).run(&request_for(&project)).unwrap_err();
    assert!(matches!(
        err,
        DriverError::Registration(HostError::Protocol(_))
    ));
    assert_eq!(host.registrations.load(Ordering::SeqCst), 1);
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_during_unanswered_call_still_tears_down() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        hang_on_activate: true,
        ..Script::default()
    });
    let driver = driver_for(&host);
    let cancel = driver.cancel_token();
    let interrupter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });

    let started = Instant::now();
    let err = driver.run(&request_for(&project)).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(matches!(err, DriverError::Cancelled { waiting_for: None }));
    assert_eq!(host.calls(), vec![Call::Activate]);
    assert_eq!(host.closes.load(Ordering::SeqCst), 1);
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
    assert!(!call_filter::is_registered());
    interrupter.join().unwrap();
}

#[test]
fn unresponsive_host_cannot_block_teardown() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        hang_on_teardown: true,
        ..Script::default()
    });
    let started = Instant::now();
    let output = driver_for(&host).run(&request_for(&project)).unwrap();

    assert_eq!(output.output, host.script.output);
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(host.closes.load(Ordering::SeqCst), 1);
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
    assert!(!call_filter::is_registered());
}

#[test]
fn transient_connect_failure_is_retried_once() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        transient_connects: 1,
        ..Script::default()
    });
    driver_for(&host).run(&request_for(&project)).unwrap();
    assert_eq!(host.connects.load(Ordering::SeqCst), 2);

    let host = FakeHost::new(Script {
        transient_connects: 2,
        ..Script::default()
    });
    let err = driver_for(&host).run(&request_for(&project)).unwrap_err();
    assert!(matches!(err, DriverError::Acquire { .. }));
    assert_eq!(host.quits.load(Ordering::SeqCst), 0);
}

#[test]
fn unreadable_output_is_fatal() {
    let (_dir, project) = project_fixture();
    let host = FakeHost::new(Script {
        write_output: false,
        ..Script::default()
    });
    let err = driver_for(&host).run(&request_for(&project)).unwrap_err();
    assert!(matches!(
        err,
        DriverError::Handoff(crate::handoff::HandoffError::ReadOutput { .. })
    ));
    assert_eq!(host.quits.load(Ordering::SeqCst), 1);
}

#[test]
fn first_event_of_any_kind_marks_host_ready() {
    let tracker = MilestoneTracker::new(Duration::from_millis(5));
    assert!(apply_event(
        &tracker,
        &HostEvent::CommandExecuted(CommandId::new("{00000000-0000-0000-0000-000000000000}", 1))
    ));
    assert_eq!(tracker.current(), Milestone::HostReady);

    let tracker = MilestoneTracker::new(Duration::from_millis(5));
    assert!(apply_event(&tracker, &HostEvent::SolutionOpened));
    assert_eq!(tracker.current(), Milestone::HostReady);
}

#[test]
fn events_advance_milestones_in_order() {
    let tracker = MilestoneTracker::new(Duration::from_millis(5));
    apply_event(&tracker, &HostEvent::HostActivity);
    assert!(apply_event(&tracker, &HostEvent::SolutionOpened));
    assert!(!apply_event(&tracker, &HostEvent::SolutionOpened));
    assert_eq!(tracker.current(), Milestone::ProjectOpened);
    assert!(apply_event(
        &tracker,
        &HostEvent::CommandExecuted(CommandId::nuget_sources())
    ));
    assert_eq!(tracker.current(), Milestone::ConsoleReady);
    assert!(!apply_event(&tracker, &HostEvent::HostActivity));
    assert_eq!(tracker.current(), Milestone::ConsoleReady);
}

#[test]
fn console_ready_event_before_project_is_ignored() {
    let tracker = MilestoneTracker::new(Duration::from_millis(5));
    apply_event(&tracker, &HostEvent::HostActivity);
    apply_event(
        &tracker,
        &HostEvent::CommandExecuted(CommandId::nuget_sources()),
    );
    assert_eq!(tracker.current(), Milestone::HostReady);
}
