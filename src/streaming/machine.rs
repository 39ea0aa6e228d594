//! Connection lifecycle as a pure state machine.
//!
//! The driver feeds transport events in and executes the returned commands. Nothing here does
//! I/O, so every transition can be tested synchronously.
use crate::{
    model::{message, Data, Inbound},
    status::{ErrorInfo, ErrorKind, StateType},
};

/// Client-initiated normal close. Terminal.
pub(crate) const NORMAL_CLOSE: u16 = 1000;
pub(crate) const NORMAL_CLOSE_REASON: &str = "normal close";
/// Server rejected the request (e.g., bad token). Terminal.
pub(crate) const INVALID_REQUEST_CLOSE: u16 = 4003;
/// Going away. Sent with [`RESYNC_REASON`] to drop the connection and resync.
pub(crate) const GOING_AWAY_CLOSE: u16 = 1001;
pub(crate) const RESYNC_REASON: &str = "reconn";
/// Close frame without a status code.
pub(crate) const NO_STATUS_CLOSE: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Connecting,
    Connected,
    /// Waiting for our own close to complete.
    Closing,
    WaitingToReconnect,
    /// Retry ceiling reached. No further attempts.
    Exhausted,
    Stopped,
}

/// Transport failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// Handshake rejected (401/403) or a request that can never succeed.
    RequestInvalid,
    /// Generic I/O failure. The endpoint is likely down.
    Network,
    /// Timeout, EOF or reset on the websocket.
    Websocket,
    Runtime,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Failure {
        Failure {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Event {
    Start,
    /// Websocket handshake completed. `version` is the locally known data version.
    Opened { version: i64 },
    Message(String),
    /// The apply worker failed to store a dataset.
    ApplyFailed,
    /// Connection closed, by the remote side or by a close we initiated.
    Closed { code: u16, reason: String },
    Failed(Failure),
    BackoffElapsed,
    PingTick,
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Send(String),
    Apply(Box<Data>),
    Close { code: u16, reason: &'static str },
    UpdateStatus(StateType, Option<ErrorInfo>),
    ScheduleReconnect { force_max: bool },
    /// Stop the worker and exit.
    Release,
}

#[derive(Debug)]
pub(crate) struct Machine {
    phase: Phase,
    /// Connection attempts since the last successful open.
    attempts: u32,
    max_attempts: Option<u32>,
    shutting_down: bool,
}

impl Machine {
    /// `max_attempts` of `None` or `Some(0)` means unlimited.
    pub fn new(max_attempts: Option<u32>) -> Machine {
        Machine {
            phase: Phase::Idle,
            attempts: 0,
            max_attempts: max_attempts.filter(|max| *max > 0),
            shutting_down: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn handle(mut self, event: Event) -> (Machine, Vec<Command>) {
        let commands = self.transition(event);
        (self, commands)
    }

    fn transition(&mut self, event: Event) -> Vec<Command> {
        if self.phase == Phase::Stopped {
            return vec![];
        }

        match event {
            Event::Start | Event::BackoffElapsed => match self.phase {
                Phase::Idle | Phase::WaitingToReconnect => self.connect(),
                _ => vec![],
            },

            Event::Opened { version } => {
                if self.phase != Phase::Connecting {
                    return vec![];
                }
                self.phase = Phase::Connected;
                self.attempts = 0;
                vec![Command::Send(message::sync_request(version))]
            }

            Event::Message(text) => {
                if self.phase != Phase::Connected {
                    return vec![];
                }
                match Inbound::parse(&text) {
                    Ok(Inbound::DataSync(data)) if data.event_type().is_some() => {
                        vec![Command::Apply(data)]
                    }
                    Ok(_) => vec![],
                    Err(err) => {
                        self.phase = Phase::Closing;
                        vec![
                            Command::UpdateStatus(
                                StateType::Interrupted,
                                Some(ErrorInfo::new(ErrorKind::DataInvalidError, err.to_string())),
                            ),
                            resync(),
                        ]
                    }
                }
            }

            Event::ApplyFailed => {
                if self.phase != Phase::Connected {
                    return vec![];
                }
                self.phase = Phase::Closing;
                vec![resync()]
            }

            Event::PingTick => {
                if self.phase != Phase::Connected {
                    return vec![];
                }
                vec![Command::Send(message::ping())]
            }

            Event::Closed { code, reason } => self.closed(code, reason),

            Event::Failed(failure) => self.failed(failure),

            Event::Shutdown => {
                self.shutting_down = true;
                match self.phase {
                    Phase::Connected => {
                        self.phase = Phase::Closing;
                        vec![Command::Close {
                            code: NORMAL_CLOSE,
                            reason: NORMAL_CLOSE_REASON,
                        }]
                    }
                    // The pending close completes the shutdown.
                    Phase::Closing => vec![],
                    _ => self.stop(None),
                }
            }
        }
    }

    fn connect(&mut self) -> Vec<Command> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                self.phase = Phase::Exhausted;
                return vec![Command::Release];
            }
        }
        self.attempts += 1;
        self.phase = Phase::Connecting;
        vec![Command::Connect]
    }

    fn closed(&mut self, code: u16, reason: String) -> Vec<Command> {
        if self.shutting_down {
            return self.stop(None);
        }
        match code {
            NORMAL_CLOSE => self.stop(None),
            INVALID_REQUEST_CLOSE => {
                let message = if reason.is_empty() {
                    "invalid request".to_owned()
                } else {
                    reason
                };
                self.stop(Some(ErrorInfo::new(ErrorKind::RequestInvalidError, message)))
            }
            _ => {
                let mut commands = vec![];
                if reason != RESYNC_REASON {
                    let message = if reason.is_empty() {
                        "unexpected close".to_owned()
                    } else {
                        reason
                    };
                    commands.push(Command::UpdateStatus(
                        StateType::Interrupted,
                        Some(ErrorInfo::new(ErrorKind::UnknownCloseCode, message)),
                    ));
                }
                self.phase = Phase::WaitingToReconnect;
                commands.push(Command::ScheduleReconnect { force_max: false });
                commands
            }
        }
    }

    fn failed(&mut self, failure: Failure) -> Vec<Command> {
        if self.shutting_down {
            return self.stop(None);
        }
        let (kind, force_max) = match failure.kind {
            FailureKind::RequestInvalid => {
                return self.stop(Some(ErrorInfo::new(
                    ErrorKind::RequestInvalidError,
                    failure.message,
                )));
            }
            FailureKind::Network => (ErrorKind::NetworkError, true),
            FailureKind::Websocket => (ErrorKind::WebsocketError, false),
            FailureKind::Runtime => (ErrorKind::RuntimeError, false),
            FailureKind::Unknown => (ErrorKind::UnknownError, false),
        };
        self.phase = Phase::WaitingToReconnect;
        vec![
            Command::UpdateStatus(
                StateType::Interrupted,
                Some(ErrorInfo::new(kind, failure.message)),
            ),
            Command::ScheduleReconnect { force_max },
        ]
    }

    fn stop(&mut self, error: Option<ErrorInfo>) -> Vec<Command> {
        self.phase = Phase::Stopped;
        vec![Command::UpdateStatus(StateType::Off, error), Command::Release]
    }
}

fn resync() -> Command {
    Command::Close {
        code: GOING_AWAY_CLOSE,
        reason: RESYNC_REASON,
    }
}
