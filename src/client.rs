use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    data_store::DataStore,
    eval::{EvalResult, Evaluator, Reason},
    events::{EventSink, FlagEvent},
    key::EnvScope,
    model::{Category, FeatureFlag, Inbound, UserTag, VersionedItem},
    status::{DataUpdater, State, StateType},
    streaming::StreamingThread,
    user::FfcUser,
    ClientConfig, Error, Result,
};

/// Variation id reported when no flag was evaluated.
pub const NO_VARIATION: i32 = -1;

/// A feature flag client.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Examples
/// ```no_run
/// # use ffc_core::{ClientConfig, FfcClient, FfcUser};
/// let client = FfcClient::new("eHl6X18xX18yX18zX19zZWNyZXQ=", ClientConfig::new()).unwrap();
/// let user = FfcUser::builder("user-1").country("FR").build();
/// let value = client.variation("new-checkout", &user, "off");
/// ```
pub struct FfcClient<'a> {
    scope: EnvScope,
    config: ClientConfig<'a>,
    updater: Arc<DataUpdater>,
    streaming: Option<StreamingThread>,
}

impl<'a> FfcClient<'a> {
    /// Create a client and, unless offline, start streaming.
    ///
    /// Blocks up to [`ClientConfig::start_wait`] for the first dataset. Not receiving one in time
    /// is not an error: check [`FfcClient::is_initialized`] or use [`FfcClient::wait_for_state`].
    pub fn new(env_secret: &str, config: ClientConfig<'a>) -> Result<Self> {
        let scope = EnvScope::from_env_secret(env_secret)?;
        let updater = Arc::new(DataUpdater::new(Arc::new(DataStore::new())));

        let streaming = if config.offline {
            log::info!(target: "ffc", "client is in offline mode");
            None
        } else {
            let streaming =
                StreamingThread::start(config.streaming.clone(), env_secret, updater.clone())?;
            if !config.start_wait.is_zero() {
                log::info!(target: "ffc", start_wait:? = config.start_wait; "waiting for client initialization");
                if streaming.wait_for_initialization(config.start_wait) {
                    log::info!(target: "ffc", "client initialized");
                } else {
                    log::warn!(target: "ffc", "client was not initialized in time, serving default values");
                }
            }
            Some(streaming)
        };

        Ok(FfcClient {
            scope,
            config,
            updater,
            streaming,
        })
    }

    /// Whether data has been received and flags are served from it.
    pub fn is_initialized(&self) -> bool {
        match &self.streaming {
            Some(streaming) => streaming.is_initialized(),
            None => self.updater.storage_initialized(),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.config.offline
    }

    /// Evaluate `flag_key` for `user`, returning `default` if it cannot be evaluated.
    pub fn variation(&self, flag_key: &str, user: &FfcUser, default: &str) -> String {
        self.variation_detail(flag_key, user, default).value
    }

    /// Like [`FfcClient::variation`], also reporting why the value was served.
    pub fn variation_detail(&self, flag_key: &str, user: &FfcUser, default: &str) -> EvalDetail {
        if !self.is_initialized() {
            log::warn!(target: "ffc", flag_key = flag_key; "evaluation called before the client is initialized, serving default value");
            return EvalDetail::unevaluated(default, Reason::ClientNotReady, flag_key);
        }
        if flag_key.trim().is_empty() {
            log::warn!(target: "ffc", "empty flag key, serving default value");
            return EvalDetail::unevaluated(default, Reason::FlagNotFound, flag_key);
        }

        let snapshot = self.updater.snapshot();
        let Some(flag) = snapshot.flag(&self.scope.flag_id(flag_key)) else {
            log::warn!(target: "ffc", flag_key = flag_key; "unknown flag, serving default value");
            return EvalDetail::unevaluated(default, Reason::FlagNotFound, flag_key);
        };
        if user.key().trim().is_empty() {
            log::warn!(target: "ffc", flag_key = flag_key; "user without key, serving default value");
            return EvalDetail::unevaluated(default, Reason::UserNotSpecified, flag_key);
        }

        let result = Evaluator::new(&*snapshot).evaluate(flag, user);
        if result.reason != Reason::Error {
            self.send_event(FlagEvent::new(flag_key, user, &result));
        }
        EvalDetail::evaluated(flag, result)
    }

    /// Evaluate every known flag for `user`.
    ///
    /// Events are only sent for the flags read through [`AllFlagStates::get`].
    pub fn all_latest_flags_variations(&self, user: &FfcUser) -> AllFlagStates<'_> {
        let mut states = AllFlagStates {
            reason: None,
            states: HashMap::new(),
            user: user.clone(),
            sink: &*self.config.event_sink,
        };
        if !self.is_initialized() {
            log::warn!(target: "ffc", "evaluation called before the client is initialized");
            states.reason = Some(Reason::ClientNotReady);
            return states;
        }
        if user.key().trim().is_empty() {
            log::warn!(target: "ffc", "user without key");
            states.reason = Some(Reason::UserNotSpecified);
            return states;
        }

        let snapshot = self.updater.snapshot();
        let evaluator = Evaluator::new(&*snapshot);
        for flag in snapshot.flags() {
            let result = evaluator.evaluate(flag, user);
            let event = (result.reason != Reason::Error)
                .then(|| FlagEvent::new(flag.key_name(), user, &result));
            states.states.insert(
                flag.key_name().to_owned(),
                (EvalDetail::evaluated(flag, result), event),
            );
        }
        states
    }

    /// Whether `flag_key` exists in the current data.
    pub fn is_flag_known(&self, flag_key: &str) -> bool {
        if !self.is_initialized() {
            log::warn!(target: "ffc", flag_key = flag_key; "is_flag_known called before the client is initialized");
            return false;
        }
        self.updater
            .snapshot()
            .flag(&self.scope.flag_id(flag_key))
            .is_some()
    }

    /// All user tags of the environment.
    pub fn user_tags(&self) -> Vec<UserTag> {
        if !self.is_initialized() {
            return vec![];
        }
        self.updater
            .store()
            .get_all(Category::Tags)
            .into_values()
            .filter_map(|item| match &*item {
                VersionedItem::Tag(tag) => Some(tag.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn status(&self) -> State {
        self.updater.current_state()
    }

    /// Block until the client reaches `state`. See [`DataUpdater::wait_for`].
    pub fn wait_for_state(&self, state: StateType, timeout: Duration) -> bool {
        self.updater.wait_for(state, timeout)
    }

    /// Load a data-sync message (`full` or `patch`) in offline mode.
    ///
    /// Returns `Ok(false)` if the document carries no dataset, the dataset was rejected, or the
    /// client still has no data to serve afterwards.
    pub fn initialize_from_external_json(&self, json: &str) -> Result<bool> {
        if !self.config.offline {
            return Err(Error::NotOffline);
        }
        if json.trim().is_empty() {
            return Ok(false);
        }

        let data = match Inbound::parse(json)? {
            Inbound::DataSync(data) if data.event_type().is_some() => data,
            other => {
                log::warn!(target: "ffc", message:? = other; "external json carries no dataset");
                return Ok(false);
            }
        };
        let initialized = self.updater.apply_data(*data) && self.updater.storage_initialized();
        if initialized {
            self.updater.update_status(StateType::Ok, None);
        }
        Ok(initialized)
    }

    /// Stop streaming and turn the client `Off`.
    pub fn close(&mut self) -> Result<()> {
        log::info!(target: "ffc", "client is closing");
        let result = match self.streaming.take() {
            Some(streaming) => streaming.shutdown(),
            None => Ok(()),
        };
        self.updater.update_status(StateType::Off, None);
        result
    }

    fn send_event(&self, event: FlagEvent) {
        log::trace!(target: "ffc", event:serde = event; "sending flag event");
        self.config.event_sink.send(event);
    }
}

impl<'a> Drop for FfcClient<'a> {
    fn drop(&mut self) {
        if let Some(streaming) = &self.streaming {
            streaming.stop();
        }
    }
}

/// Evaluation outcome as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalDetail {
    pub value: String,
    /// [`NO_VARIATION`] if no flag was evaluated.
    pub variation_id: i32,
    pub reason: Reason,
    pub key_name: String,
    /// Flag display name, empty if unknown.
    pub name: String,
}

impl EvalDetail {
    fn evaluated(flag: &FeatureFlag, result: EvalResult) -> EvalDetail {
        EvalDetail {
            value: result.value,
            variation_id: result.variation_id,
            reason: result.reason,
            key_name: flag.key_name().to_owned(),
            name: flag.info.name.clone().unwrap_or_default(),
        }
    }

    fn unevaluated(default: &str, reason: Reason, flag_key: &str) -> EvalDetail {
        EvalDetail {
            value: default.to_owned(),
            variation_id: NO_VARIATION,
            reason,
            key_name: flag_key.to_owned(),
            name: String::new(),
        }
    }
}

/// Results of [`FfcClient::all_latest_flags_variations`], keyed by flag key.
pub struct AllFlagStates<'c> {
    reason: Option<Reason>,
    states: HashMap<String, (EvalDetail, Option<FlagEvent>)>,
    user: FfcUser,
    sink: &'c (dyn EventSink + Send + Sync + 'c),
}

impl<'c> AllFlagStates<'c> {
    /// `false` if nothing was evaluated, see [`AllFlagStates::reason`].
    pub fn is_success(&self) -> bool {
        self.reason.is_none()
    }

    /// Why nothing was evaluated.
    pub fn reason(&self) -> Option<Reason> {
        self.reason
    }

    pub fn user(&self) -> &FfcUser {
        &self.user
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Result for `flag_key`. Reading a result sends its flag event.
    pub fn get(&self, flag_key: &str) -> Option<&EvalDetail> {
        let (detail, event) = self.states.get(flag_key)?;
        if let Some(event) = event {
            self.sink.send(event.clone());
        }
        Some(detail)
    }
}
