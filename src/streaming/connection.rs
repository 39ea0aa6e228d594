//! Websocket transport driving the [`Machine`].
use std::{collections::VecDeque, io, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        http::StatusCode,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use super::{
    machine::{Command, Event, Failure, FailureKind, Machine, Phase, NO_STATUS_CLOSE},
    worker::Worker,
    InitGate, StreamingConfig,
};
use crate::{backoff::BackoffStrategy, key::build_token, status::DataUpdater, Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STREAMING_PATH: &str = "/streaming";

/// `<streaming_url>/streaming`, without query.
pub(crate) fn streaming_endpoint(streaming_url: &str) -> Result<Url> {
    Url::parse(&format!(
        "{}{}",
        streaming_url.trim_end_matches('/'),
        STREAMING_PATH
    ))
    .map_err(Error::InvalidStreamingUrl)
}

pub(crate) struct Connection {
    pub config: StreamingConfig,
    pub endpoint: Url,
    pub env_secret: String,
    pub updater: Arc<DataUpdater>,
    pub gate: Arc<InitGate>,
}

impl Connection {
    /// Run until shutdown, a terminal close or retry exhaustion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let (resync_sender, mut resync) = mpsc::channel(1);
        let worker = Worker::spawn(
            self.updater.clone(),
            self.gate.clone(),
            resync_sender,
            self.config.enqueue_timeout,
        );

        let mut machine = Machine::new(self.config.max_retries);
        let mut backoff = BackoffStrategy::new(self.config.backoff);
        let mut socket: Option<Socket> = None;
        let mut reconnect_at: Option<Instant> = None;
        let mut ping = ping_interval(self.config.ping_interval);
        let mut stopping = false;
        let mut events = VecDeque::from([Event::Start]);

        loop {
            let event = match events.pop_front() {
                Some(event) => event,
                None => {
                    let event = tokio::select! {
                        _ = shutdown_requested(&mut shutdown), if !stopping => {
                            stopping = true;
                            Some(Event::Shutdown)
                        }
                        message = next_message(&mut socket) => to_event(message),
                        _ = ping.tick(), if socket.is_some() => Some(Event::PingTick),
                        Some(()) = resync.recv() => Some(Event::ApplyFailed),
                        _ = sleep_until(reconnect_at) => {
                            reconnect_at = None;
                            Some(Event::BackoffElapsed)
                        }
                    };
                    match event {
                        Some(event) => event,
                        None => continue,
                    }
                }
            };

            log::trace!(target: "ffc", event:? = event; "streaming event");
            let (next, commands) = machine.handle(event);
            machine = next;

            for command in commands {
                match command {
                    Command::Connect => {
                        backoff.mark_good_run_now();
                        let url = self.url_with_token();
                        log::debug!(target: "ffc", endpoint:% = self.endpoint; "connecting");
                        tokio::select! {
                            result = time::timeout(
                                self.config.connect_timeout,
                                connect_async(url.as_str()),
                            ) => match result {
                                Ok(Ok((ws, _response))) => {
                                    log::info!(target: "ffc", "streaming websocket connected");
                                    socket = Some(ws);
                                    ping.reset();
                                    let version = if self.updater.storage_initialized() {
                                        self.updater.version()
                                    } else {
                                        0
                                    };
                                    events.push_back(Event::Opened { version });
                                }
                                Ok(Err(err)) => events.push_back(Event::Failed(classify(&err))),
                                Err(_) => events.push_back(Event::Failed(Failure::new(
                                    FailureKind::Websocket,
                                    "connect timed out",
                                ))),
                            },
                            _ = shutdown_requested(&mut shutdown), if !stopping => {
                                stopping = true;
                                events.push_back(Event::Shutdown);
                            }
                        }
                    }

                    Command::Send(text) => {
                        if let Some(ws) = socket.as_mut() {
                            if let Err(err) = ws.send(Message::Text(text)).await {
                                events.push_back(Event::Failed(classify(&err)));
                            }
                        }
                    }

                    Command::Apply(data) => {
                        worker.enqueue(data).await;
                    }

                    Command::Close { code, reason } => {
                        if let Some(mut ws) = socket.take() {
                            close_gracefully(&mut ws, code, reason, self.config.close_timeout)
                                .await;
                        }
                        events.push_back(Event::Closed {
                            code,
                            reason: reason.to_owned(),
                        });
                    }

                    Command::UpdateStatus(state, error) => {
                        if let Some(error) = &error {
                            log::warn!(target: "ffc", state:? = state, kind:% = error.kind; "streaming error: {error}");
                        }
                        self.updater.update_status(state, error);
                    }

                    Command::ScheduleReconnect { force_max } => {
                        close_quietly(&mut socket, self.config.close_timeout).await;
                        let delay = backoff.next_delay(force_max);
                        log::info!(target: "ffc", retry = backoff.retry_count(); "reconnecting in {delay:?}");
                        reconnect_at = Some(Instant::now() + delay);
                    }

                    Command::Release => {
                        if machine.phase() == Phase::Exhausted {
                            log::error!(target: "ffc", max_retries:? = self.config.max_retries; "giving up on streaming after too many connection attempts");
                        }
                        close_quietly(&mut socket, self.config.close_timeout).await;
                        worker.stop(self.config.close_timeout).await;
                        log::debug!(target: "ffc", "streaming stopped");
                        return;
                    }
                }
            }
        }
    }

    fn url_with_token(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", &build_token(&self.env_secret))
            .append_pair("type", "server")
            .append_pair("version", "2");
        url
    }
}

fn ping_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Resolves once a stop was requested or the handle was dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn next_message(socket: &mut Option<Socket>) -> Option<tungstenite::Result<Message>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn to_event(message: Option<tungstenite::Result<Message>>) -> Option<Event> {
    match message {
        Some(Ok(Message::Text(text))) => Some(Event::Message(text)),
        Some(Ok(Message::Close(frame))) => {
            let (code, reason) = match frame {
                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                None => (NO_STATUS_CLOSE, String::new()),
            };
            log::debug!(target: "ffc", code = code, reason:% = reason; "server closed the connection");
            Some(Event::Closed { code, reason })
        }
        // Pings are answered by the transport.
        Some(Ok(_)) => None,
        Some(Err(err)) => Some(Event::Failed(classify(&err))),
        None => Some(Event::Failed(Failure::new(
            FailureKind::Websocket,
            "connection closed unexpectedly",
        ))),
    }
}

/// Send a close frame and wait (bounded) for the peer to acknowledge it.
async fn close_gracefully(ws: &mut Socket, code: u16, reason: &'static str, timeout: Duration) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    };
    let result = time::timeout(timeout, async {
        ws.close(Some(frame)).await?;
        while let Some(message) = ws.next().await {
            message?;
        }
        Ok::<_, tungstenite::Error>(())
    })
    .await;
    match result {
        Ok(Ok(())) | Ok(Err(tungstenite::Error::ConnectionClosed)) => {}
        Ok(Err(err)) => log::debug!(target: "ffc", "error while closing websocket: {err}"),
        Err(_) => log::debug!(target: "ffc", "websocket close timed out"),
    }
}

async fn close_quietly(socket: &mut Option<Socket>, timeout: Duration) {
    if let Some(mut ws) = socket.take() {
        let _ = time::timeout(timeout, ws.close(None)).await;
    }
}

pub(crate) fn classify(err: &tungstenite::Error) -> Failure {
    use tungstenite::Error as WsError;

    let kind = match err {
        WsError::Http(response) => match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::RequestInvalid,
            _ => FailureKind::Network,
        },
        WsError::Io(err) => match err.kind() {
            io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => FailureKind::Websocket,
            _ => FailureKind::Network,
        },
        WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_) => {
            FailureKind::Websocket
        }
        // Scheme or host the transport cannot use, retrying will not help.
        WsError::Url(_) => FailureKind::RequestInvalid,
        _ => FailureKind::Unknown,
    };
    let message = match err {
        WsError::Http(response) => format!("handshake rejected with HTTP {}", response.status()),
        err => err.to_string(),
    };
    Failure::new(kind, message)
}
