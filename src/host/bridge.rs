use super::protocol::{BridgeMessage, BridgeRequest, EventPayload, ReplyStatus, RequestOp};
use super::{CommandId, EventSink, HostConnector, HostError, HostEvent, HostSession, RejectType};
use crate::call_filter;
use crate::cancel::CancelToken;
use crate::lock_or_recover;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

const QUIT_GRACE: Duration = Duration::from_secs(5);
const EXIT_POLL: Duration = Duration::from_millis(50);
const REPLY_POLL: Duration = Duration::from_millis(25);

/// Launches the automation bridge process that owns the real host instance.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    program: String,
    args: Vec<String>,
}

impl BridgeConnector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a shell-style command line into program and arguments.
    pub fn from_command_line(line: &str) -> Result<Self, HostError> {
        let mut words = shell_words::split(line)
            .map_err(|err| HostError::Unavailable(format!("invalid host bridge command: {err}")))?
            .into_iter();
        let program = words
            .next()
            .ok_or_else(|| HostError::Unavailable("host bridge command is empty".to_string()))?;
        Ok(Self::new(program, words.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl HostConnector for BridgeConnector {
    type Session = BridgeSession;

    fn connect(&self, version: &str) -> Result<BridgeSession, HostError> {
        tracing::debug!(program = %self.program, version, "Starting host bridge");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--vs-version")
            .arg(version)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                HostError::Unavailable(format!(
                    "failed to start host bridge '{}': {err}",
                    self.program
                ))
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(HostError::Unavailable(
                "host bridge pipes unavailable".to_string(),
            ));
        };
        Ok(BridgeSession::from_streams(stdout, stdin, Some(child)))
    }
}

/// One host instance reached through the bridge. A reader thread plays the role of the host's
/// callback thread: it forwards events to the registered sink and replies to the waiting call.
pub struct BridgeSession {
    writer: Mutex<Box<dyn Write + Send>>,
    replies: Receiver<CallTraffic>,
    sink: Arc<Mutex<Option<EventSink>>>,
    next_seq: AtomicU64,
    child: Mutex<Option<Child>>,
}

impl BridgeSession {
    pub fn from_streams<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        let sink = Arc::new(Mutex::new(None));
        let reader_sink = Arc::clone(&sink);
        if let Err(err) = thread::Builder::new()
            .name("host-bridge-reader".to_string())
            .spawn(move || read_bridge_output(BufReader::new(reader), reply_tx, reader_sink))
        {
            // Without a reader every call reports a closed connection.
            tracing::error!("failed to spawn host bridge reader: {err}");
        }
        Self {
            writer: Mutex::new(Box::new(writer)),
            replies: reply_rx,
            sink,
            next_seq: AtomicU64::new(1),
            child: Mutex::new(child),
        }
    }

    fn send(&self, request: &BridgeRequest) -> Result<(), HostError> {
        let mut line = serde_json::to_string(request)
            .map_err(|err| HostError::Protocol(format!("failed to encode request: {err}")))?;
        line.push('\n');
        let mut writer = lock_or_recover(&self.writer, "host bridge writer");
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|err| match err.kind() {
                io::ErrorKind::BrokenPipe => HostError::Disconnected,
                _ => HostError::Io(err),
            })
    }

    /// Issue one request and block until its reply or until `cancel` fires. Filter questions
    /// the bridge relays while the call is outstanding are answered on this thread, where the
    /// filter is registered. A reply that arrives after the caller gave up is skipped as stale
    /// by the next call.
    fn call(&self, op: RequestOp, cancel: &CancelToken) -> Result<(), HostError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let name = op.name();
        self.send(&BridgeRequest { seq, op })?;
        loop {
            let traffic = match self.replies.recv_timeout(REPLY_POLL) {
                Ok(traffic) => traffic,
                Err(RecvTimeoutError::Timeout) if cancel.is_cancelled() => {
                    tracing::warn!(call = name, seq, "Gave up waiting for host reply");
                    return Err(HostError::Interrupted);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(HostError::Disconnected),
            };
            match traffic {
                CallTraffic::Reply(reply) => {
                    if reply.seq != seq {
                        tracing::debug!(expected = seq, got = reply.seq, "Ignoring stale reply");
                        continue;
                    }
                    return reply.into_result(name);
                }
                CallTraffic::IncomingCall(call_type) => {
                    let response = call_filter::handle_incoming_call(call_type);
                    tracing::debug!(call = name, call_type, ?response, "Incoming host call");
                    self.send(&BridgeRequest {
                        seq,
                        op: RequestOp::FilterResponse {
                            code: response.as_raw(),
                        },
                    })?;
                }
                CallTraffic::MessagePending(pending_type) => {
                    let response = call_filter::message_pending(pending_type);
                    tracing::debug!(call = name, pending_type, ?response, "Message pending");
                    self.send(&BridgeRequest {
                        seq,
                        op: RequestOp::FilterResponse {
                            code: response.as_raw(),
                        },
                    })?;
                }
            }
        }
    }

    /// Give the bridge a moment to exit on its own, then make sure it is gone.
    fn reap_child(&self, grace: Duration) {
        let mut child = lock_or_recover(&self.child, "host bridge child");
        let Some(process) = child.as_mut() else {
            return;
        };
        let deadline = Instant::now() + grace;
        loop {
            match process.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "Host bridge exited");
                    break;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                Ok(None) => {
                    tracing::warn!("Host bridge still running; killing it");
                    let _ = process.kill();
                    let _ = process.wait();
                    break;
                }
                Err(err) => {
                    tracing::warn!("Failed to poll host bridge: {err}");
                    let _ = process.kill();
                    break;
                }
            }
        }
        child.take();
    }
}

impl HostSession for BridgeSession {
    fn register_events(&self, sink: EventSink, cancel: &CancelToken) -> Result<(), HostError> {
        *lock_or_recover(&self.sink, "host event sink") = Some(sink);
        let result = self.call(RequestOp::RegisterEvents, cancel);
        if result.is_err() {
            lock_or_recover(&self.sink, "host event sink").take();
        }
        result
    }

    fn activate_main_window(&self, cancel: &CancelToken) -> Result<(), HostError> {
        self.call(RequestOp::ActivateMainWindow, cancel)
    }

    fn execute_command(
        &self,
        name: &str,
        args: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<(), HostError> {
        self.call(
            RequestOp::ExecuteCommand {
                command: name.to_string(),
                args: args.map(str::to_string),
            },
            cancel,
        )
    }

    fn close_solution(&self, cancel: &CancelToken) -> Result<(), HostError> {
        self.call(RequestOp::CloseSolution, cancel)
    }

    /// Ask the bridge to quit, then wait out its exit. A bridge that is still alive after the
    /// grace period is killed, whether or not it answered.
    fn quit(&self, cancel: &CancelToken) -> Result<(), HostError> {
        let result = self.call(RequestOp::Quit, cancel);
        self.reap_child(QUIT_GRACE);
        result
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.reap_child(Duration::ZERO);
    }
}

/// Bridge output addressed to the call in flight. Events never travel this way.
enum CallTraffic {
    Reply(Reply),
    IncomingCall(i32),
    MessagePending(i32),
}

struct Reply {
    seq: u64,
    status: ReplyStatus,
    reject_type: Option<i32>,
    message: Option<String>,
    transient: bool,
}

impl Reply {
    fn into_result(self, call: &str) -> Result<(), HostError> {
        match self.status {
            ReplyStatus::Ok => Ok(()),
            ReplyStatus::Rejected => {
                let raw = self.reject_type.unwrap_or(RejectType::RAW_REJECTED);
                Err(HostError::Rejected(RejectType::from_raw(raw)))
            }
            ReplyStatus::Error => {
                let message = self.message.unwrap_or_else(|| format!("{call} failed"));
                if self.transient {
                    Err(HostError::Transient(message))
                } else {
                    Err(HostError::Protocol(message))
                }
            }
        }
    }
}

fn read_bridge_output(
    reader: impl BufRead,
    replies: Sender<CallTraffic>,
    sink: Arc<Mutex<Option<EventSink>>>,
) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::debug!("Host bridge read failed: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let traffic = match serde_json::from_str::<BridgeMessage>(&line) {
            Ok(BridgeMessage::Event(payload)) => {
                deliver_event(&sink, payload);
                continue;
            }
            Ok(BridgeMessage::Reply {
                seq,
                status,
                reject_type,
                message,
                transient,
            }) => CallTraffic::Reply(Reply {
                seq,
                status,
                reject_type,
                message,
                transient,
            }),
            Ok(BridgeMessage::IncomingCall { call_type }) => CallTraffic::IncomingCall(call_type),
            Ok(BridgeMessage::MessagePending { pending_type }) => {
                CallTraffic::MessagePending(pending_type)
            }
            Err(err) => {
                tracing::warn!("Ignoring malformed host bridge line: {err}");
                continue;
            }
        };
        if replies.send(traffic).is_err() {
            break;
        }
    }
    tracing::debug!("Host bridge output closed");
}

pub(super) fn event_from_payload(payload: EventPayload) -> HostEvent {
    match payload {
        EventPayload::SolutionOpened => HostEvent::SolutionOpened,
        EventPayload::CommandBeforeExecute {
            guid,
            id,
            custom_in,
            custom_out,
        } => {
            tracing::debug!(
                "Command Sent: GUID: {guid}; ID: {id}; CustomIn: {}; CustomOut: {}",
                custom_in.as_deref().unwrap_or(""),
                custom_out.as_deref().unwrap_or("")
            );
            HostEvent::CommandStarted(CommandId::new(guid, id))
        }
        EventPayload::CommandAfterExecute {
            guid,
            id,
            custom_in,
            custom_out,
        } => {
            tracing::debug!(
                "Command Executed: GUID: {guid}; ID: {id}; CustomIn: {}; CustomOut: {}",
                custom_in.as_deref().unwrap_or(""),
                custom_out.as_deref().unwrap_or("")
            );
            HostEvent::CommandExecuted(CommandId::new(guid, id))
        }
        EventPayload::Unknown => HostEvent::HostActivity,
    }
}

fn deliver_event(sink: &Mutex<Option<EventSink>>, payload: EventPayload) {
    let event = event_from_payload(payload);
    let sink = lock_or_recover(sink, "host event sink");
    match sink.as_ref() {
        Some(sink) => {
            if sink.send(event).is_err() {
                tracing::debug!("Event listener gone; dropping host event");
            }
        }
        None => tracing::debug!(?event, "Dropping host event received before registration"),
    }
}
