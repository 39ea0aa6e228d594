use std::time::Duration;

use crate::{
    events::{EventSink, NoopEventSink},
    streaming::StreamingConfig,
    FfcClient, Result,
};

/// Configuration for [`FfcClient`].
pub struct ClientConfig<'a> {
    pub(crate) offline: bool,
    pub(crate) start_wait: Duration,
    pub(crate) streaming: StreamingConfig,
    pub(crate) event_sink: Box<dyn EventSink + Send + Sync + 'a>,
}

impl<'a> ClientConfig<'a> {
    /// Default value for [`ClientConfig::start_wait`].
    pub const DEFAULT_START_WAIT: Duration = Duration::from_secs(15);

    /// Create a default configuration: online, waiting up to 15 seconds for the first dataset.
    ///
    /// ```
    /// # use ffc_core::ClientConfig;
    /// ClientConfig::new();
    /// ```
    pub fn new() -> Self {
        ClientConfig {
            offline: false,
            start_wait: ClientConfig::DEFAULT_START_WAIT,
            streaming: StreamingConfig::default(),
            event_sink: Box::new(NoopEventSink),
        }
    }

    /// In offline mode the client never connects and is fed through
    /// [`FfcClient::initialize_from_external_json`].
    pub fn offline(&mut self, offline: bool) -> &mut Self {
        self.offline = offline;
        self
    }

    /// How long [`FfcClient::new`] blocks waiting for the first dataset. Zero does not wait.
    pub fn start_wait(&mut self, start_wait: Duration) -> &mut Self {
        self.start_wait = start_wait;
        self
    }

    pub fn streaming(&mut self, streaming: StreamingConfig) -> &mut Self {
        self.streaming = streaming;
        self
    }

    /// Set the sink receiving one event per served evaluation.
    ///
    /// ```
    /// # use ffc_core::{ClientConfig, FlagEvent};
    /// let mut config = ClientConfig::new();
    /// config.event_sink(|event: FlagEvent| {
    ///   println!("{:?}", event);
    /// });
    /// ```
    pub fn event_sink(&mut self, event_sink: impl EventSink + Send + Sync + 'a) -> &mut Self {
        self.event_sink = Box::new(event_sink);
        self
    }

    /// Create a new [`FfcClient`] using this configuration.
    pub fn to_client(self, env_secret: &str) -> Result<FfcClient<'a>> {
        FfcClient::new(env_secret, self)
    }
}

impl<'a> Default for ClientConfig<'a> {
    fn default() -> Self {
        ClientConfig::new()
    }
}
