//! Streaming synchronization with the feature flag server.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use tokio::sync::watch;

use crate::{
    backoff::BackoffConfig,
    status::{DataUpdater, ErrorInfo, ErrorKind, StateType},
    Error, Result,
};

mod connection;
mod machine;
mod worker;

use connection::{streaming_endpoint, Connection};

/// Configuration for [`StreamingThread`].
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Base URL of the streaming server. `/streaming` is appended.
    ///
    /// Defaults to [`StreamingConfig::DEFAULT_STREAMING_URL`].
    pub streaming_url: String,
    pub backoff: BackoffConfig,
    /// Maximum consecutive connection attempts. `None` or `Some(0)` retries forever.
    pub max_retries: Option<u32>,
    /// Defaults to [`StreamingConfig::DEFAULT_CONNECT_TIMEOUT`].
    pub connect_timeout: Duration,
    /// Defaults to [`StreamingConfig::DEFAULT_PING_INTERVAL`].
    pub ping_interval: Duration,
    /// How long to wait for the close handshake and for the apply worker to drain.
    ///
    /// Defaults to [`StreamingConfig::DEFAULT_CLOSE_TIMEOUT`].
    pub close_timeout: Duration,
    /// How long to wait for room in the apply queue before dropping a dataset.
    ///
    /// Defaults to [`StreamingConfig::DEFAULT_ENQUEUE_TIMEOUT`].
    pub enqueue_timeout: Duration,
}

impl StreamingConfig {
    /// Default value for [`StreamingConfig::streaming_url`].
    pub const DEFAULT_STREAMING_URL: &'static str = "wss://api.feature-flags.co";
    /// Default value for [`StreamingConfig::connect_timeout`].
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`StreamingConfig::ping_interval`].
    pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);
    /// Default value for [`StreamingConfig::close_timeout`].
    pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
    /// Default value for [`StreamingConfig::enqueue_timeout`].
    pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

    /// Create a new `StreamingConfig` using default configuration.
    pub fn new() -> StreamingConfig {
        StreamingConfig::default()
    }

    pub fn with_streaming_url(mut self, streaming_url: impl Into<String>) -> StreamingConfig {
        self.streaming_url = streaming_url.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> StreamingConfig {
        self.backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> StreamingConfig {
        self.max_retries = max_retries;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> StreamingConfig {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> StreamingConfig {
        self.ping_interval = ping_interval;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> StreamingConfig {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_enqueue_timeout(mut self, enqueue_timeout: Duration) -> StreamingConfig {
        self.enqueue_timeout = enqueue_timeout;
        self
    }
}

impl Default for StreamingConfig {
    fn default() -> StreamingConfig {
        StreamingConfig {
            streaming_url: StreamingConfig::DEFAULT_STREAMING_URL.to_owned(),
            backoff: BackoffConfig::default(),
            max_retries: None,
            connect_timeout: StreamingConfig::DEFAULT_CONNECT_TIMEOUT,
            ping_interval: StreamingConfig::DEFAULT_PING_INTERVAL,
            close_timeout: StreamingConfig::DEFAULT_CLOSE_TIMEOUT,
            enqueue_timeout: StreamingConfig::DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

/// One-shot initialization signal.
///
/// Holds `None` until the first dataset is applied (`Some(true)`) or streaming ends without ever
/// applying one (`Some(false)`).
pub(crate) struct InitGate {
    value: Mutex<Option<bool>>,
    resolved: Condvar,
}

impl InitGate {
    pub fn new() -> InitGate {
        InitGate {
            value: Mutex::new(None),
            resolved: Condvar::new(),
        }
    }

    /// Set the value unless already set.
    pub fn resolve(&self, value: bool) {
        let mut current = match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.is_none() {
            *current = Some(value);
            self.resolved.notify_all();
        }
    }

    pub fn get(&self) -> Option<bool> {
        match self.value.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block until resolved or `timeout` elapses. A zero timeout does not block.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut value = match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(value) = *value {
                return value;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            value = match self.resolved.wait_timeout(value, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// The streaming synchronization thread.
///
/// Keeps the data store up to date over a websocket, reconnecting with backoff until stopped.
pub struct StreamingThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Set to `true` to ask the thread to close the connection and exit.
    stop_sender: watch::Sender<bool>,

    gate: Arc<InitGate>,

    /// Set when the thread exits for any reason.
    finished: Arc<AtomicBool>,

    updater: Arc<DataUpdater>,
}

impl StreamingThread {
    /// Start streaming into `updater`.
    ///
    /// Fails only on invalid configuration. Connection problems are reported through the
    /// updater's state.
    pub fn start(
        config: StreamingConfig,
        env_secret: &str,
        updater: Arc<DataUpdater>,
    ) -> Result<StreamingThread> {
        let endpoint = streaming_endpoint(&config.streaming_url)?;
        let (stop_sender, stop_receiver) = watch::channel(false);
        let gate = Arc::new(InitGate::new());
        let finished = Arc::new(AtomicBool::new(false));

        let join_handle = {
            let connection = Connection {
                config,
                endpoint,
                env_secret: env_secret.to_owned(),
                updater: updater.clone(),
                gate: gate.clone(),
            };
            let gate = gate.clone();
            let finished = finished.clone();
            let updater = updater.clone();

            std::thread::Builder::new()
                .name("ffc-streaming".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()?;
                        runtime.block_on(connection.run(stop_receiver));
                        Ok::<_, std::io::Error>(())
                    }));
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            log::error!(target: "ffc", "failed to start streaming runtime: {err}");
                            updater.update_status(
                                StateType::Off,
                                Some(ErrorInfo::new(ErrorKind::RuntimeError, err.to_string())),
                            );
                        }
                        Err(_) => {
                            log::error!(target: "ffc", "streaming thread panicked");
                            updater.update_status(
                                StateType::Off,
                                Some(ErrorInfo::new(ErrorKind::RuntimeError, "streaming thread panicked")),
                            );
                        }
                    }
                    finished.store(true, Ordering::Release);
                    gate.resolve(false);
                })?
        };

        Ok(StreamingThread {
            join_handle,
            stop_sender,
            gate,
            finished,
            updater,
        })
    }

    /// Block until the first dataset is applied.
    ///
    /// Returns `false` if `timeout` elapses first or streaming stops before receiving any data.
    /// A zero timeout only checks the current status.
    pub fn wait_for_initialization(&self, timeout: Duration) -> bool {
        self.gate.wait(timeout)
    }

    /// Whether data was received and the store holds a dataset.
    pub fn is_initialized(&self) -> bool {
        self.gate.get() == Some(true) && self.updater.storage_initialized()
    }

    /// Whether the thread has exited (stopped, terminal close or retries exhausted).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Stop the streaming thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means the thread already exited.
        let _ = self.stop_sender.send(true);
    }

    /// Stop the streaming thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`StreamingThread::stop`] instead.
    pub fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::StreamingThreadPanicked)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use super::{InitGate, StreamingConfig, StreamingThread};
    use crate::{
        backoff::BackoffConfig,
        data_store::DataStore,
        status::{DataUpdater, ErrorKind, StateType},
        Error,
    };

    #[test]
    fn config_builders() {
        let config = StreamingConfig::new()
            .with_streaming_url("ws://localhost:5100")
            .with_max_retries(Some(3))
            .with_ping_interval(Duration::from_secs(30));
        assert_eq!(config.streaming_url, "ws://localhost:5100");
        assert_eq!(config.max_retries, Some(3));
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.close_timeout, StreamingConfig::DEFAULT_CLOSE_TIMEOUT);
    }

    #[test]
    fn gate_resolves_once() {
        let gate = Arc::new(InitGate::new());
        assert!(!gate.wait(Duration::ZERO));

        let resolver = {
            let gate = gate.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gate.resolve(true);
                gate.resolve(false);
            })
        };
        assert!(gate.wait(Duration::from_secs(5)));
        resolver.join().unwrap();
        assert_eq!(gate.get(), Some(true));
    }

    #[test]
    fn invalid_url_is_rejected() {
        let updater = Arc::new(DataUpdater::new(Arc::new(DataStore::new())));
        let result = StreamingThread::start(
            StreamingConfig::new().with_streaming_url("::not a url::"),
            "secret",
            updater,
        );
        assert!(matches!(result, Err(Error::InvalidStreamingUrl(_))));
    }

    #[test]
    fn unreachable_server_exhausts_retries() {
        let _ = env_logger::builder().is_test(true).try_init();

        let updater = Arc::new(DataUpdater::new(Arc::new(DataStore::new())));
        // Port 9 on localhost is expected to refuse connections.
        let config = StreamingConfig::new()
            .with_streaming_url("ws://127.0.0.1:9")
            .with_max_retries(Some(2))
            .with_connect_timeout(Duration::from_millis(500))
            .with_backoff(
                BackoffConfig::new()
                    .with_first_delay(Duration::from_millis(10))
                    .with_max_delay(Duration::from_millis(20)),
            );
        let streaming = StreamingThread::start(config, "secret", updater.clone()).unwrap();

        assert!(!streaming.wait_for_initialization(Duration::from_secs(10)));
        assert!(!streaming.is_initialized());
        assert!(streaming.is_finished());

        let state = updater.current_state();
        // Failures before the first dataset keep the client initializing.
        assert_eq!(state.state_type, StateType::Initializing);
        assert!(matches!(
            state.error.map(|it| it.kind),
            Some(ErrorKind::NetworkError | ErrorKind::WebsocketError)
        ));
        streaming.shutdown().unwrap();
    }

    #[test]
    fn shutdown_while_reconnecting() {
        let updater = Arc::new(DataUpdater::new(Arc::new(DataStore::new())));
        let config = StreamingConfig::new()
            .with_streaming_url("ws://127.0.0.1:9")
            .with_connect_timeout(Duration::from_millis(500))
            .with_backoff(BackoffConfig::new().with_first_delay(Duration::from_secs(30)));
        let streaming = StreamingThread::start(config, "secret", updater.clone()).unwrap();

        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        streaming.shutdown().unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(updater.current_state().state_type, StateType::Off);
    }
}
