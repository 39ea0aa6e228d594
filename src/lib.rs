//! Runtime core of a streaming feature flag client.
//!
//! # Overview
//!
//! An [`FfcClient`] keeps a local, versioned replica of flag and segment definitions in sync with
//! the feature flag service over a websocket, and evaluates flags against it for an [`FfcUser`].
//! Evaluation is deterministic: percentage rollouts bucket users by a hash of their key, so a
//! user always lands in the same variation for the same data.
//!
//! The replica lives in a [`DataStore`] that is replaced copy-on-write, so evaluation never waits
//! for an update in progress. All writes go through the [`DataUpdater`], which also tracks the
//! client [`State`]: `Initializing` until the first dataset arrives, then `Ok` or `Interrupted`
//! while reconnecting, and finally `Off`.
//!
//! An [`EventSink`] receives one [`FlagEvent`] per served evaluation, to be forwarded to an
//! analytics pipeline.
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum and only returned for invalid configuration and
//! offline bootstrap documents. Connection and storage failures never surface as errors: they are
//! reported through [`FfcClient::status`], and evaluation falls back to the caller's default
//! value until data is available.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with target `ffc` for
//! logging messages. Consider integrating a `log`-compatible logger implementation for better
//! visibility into SDK operations.
//!
//! # Examples
//!
//! ```
//! # use ffc_core::{ClientConfig, FfcClient, FfcUser};
//! let mut config = ClientConfig::new();
//! config.offline(true);
//! // base64("xyz__1__2__3__secret")
//! let client = FfcClient::new("eHl6X18xX18yX18zX19zZWNyZXQ=", config).unwrap();
//!
//! let user = FfcUser::builder("user-1").country("FR").build();
//! // Nothing was loaded, so the default is served.
//! assert_eq!(client.variation("new-checkout", &user, "off"), "off");
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod backoff;
mod client;
mod config;
pub mod data_store;
mod error;
pub mod eval;
pub mod events;
pub mod key;
pub mod model;
pub mod sharder;
pub mod status;
pub mod streaming;
pub mod user;

pub use client::{AllFlagStates, EvalDetail, FfcClient, NO_VARIATION};
pub use config::ClientConfig;
pub use data_store::DataStore;
pub use error::{Error, Result};
pub use eval::{EvalResult, Reason};
pub use events::{EventSink, FlagEvent};
pub use status::{DataUpdater, ErrorInfo, ErrorKind, State, StateType};
pub use streaming::{StreamingConfig, StreamingThread};
pub use user::FfcUser;
