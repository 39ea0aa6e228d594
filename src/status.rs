//! Connection lifecycle state and the [`DataUpdater`] that routes every store mutation through
//! it.
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

use crate::{
    data_store::{DataStore, Snapshot, StorageError},
    model::{Category, Data, DataSet, EventType, VersionedItem},
};

/// Lifecycle states. `Initializing → Ok ⇄ Interrupted`, and `Off` (terminal) from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateType {
    /// Started but no dataset has been applied yet.
    Initializing,
    /// Connected and up to date.
    Ok,
    /// Lost the connection (or failed to apply data) after a successful start. Retrying.
    Interrupted,
    /// Permanently shut down.
    Off,
}

/// Error classes reported along with a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    StorageInitError,
    StorageUpdateError,
    RequestInvalidError,
    DataInvalidError,
    /// Transport-level I/O failure. Forces the maximum reconnect delay.
    NetworkError,
    /// Read timeout, unexpected EOF or connection reset on an established websocket.
    WebsocketError,
    RuntimeError,
    UnknownError,
    UnknownCloseCode,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::StorageInitError => "Data Storage init error",
            ErrorKind::StorageUpdateError => "Data Storage update error",
            ErrorKind::RequestInvalidError => "Request invalid",
            ErrorKind::DataInvalidError => "Received Data invalid",
            ErrorKind::NetworkError => "Network error",
            ErrorKind::WebsocketError => "Websocket error",
            ErrorKind::RuntimeError => "Runtime error",
            ErrorKind::UnknownError => "Unknown error",
            ErrorKind::UnknownCloseCode => "Unknown close code",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> ErrorInfo {
        ErrorInfo {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn of(kind: ErrorKind) -> ErrorInfo {
        ErrorInfo {
            kind,
            message: None,
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind, message),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Current state, when it was entered and the error that accompanied the last transition.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub state_type: StateType,
    pub since: DateTime<Utc>,
    pub error: Option<ErrorInfo>,
}

impl State {
    fn initializing() -> State {
        State {
            state_type: StateType::Initializing,
            since: Utc::now(),
            error: None,
        }
    }
}

/// Lifecycle/status coordinator.
///
/// The sole writer of the connection state. Data source implementations push data through
/// [`DataUpdater::apply_bulk_load`], [`DataUpdater::apply_upsert`] and
/// [`DataUpdater::apply_patch`] instead of touching the [`DataStore`] directly, so that storage
/// failures show up as state transitions.
pub struct DataUpdater {
    store: Arc<DataStore>,
    state: Mutex<State>,
    changed: Condvar,
}

impl DataUpdater {
    pub fn new(store: Arc<DataStore>) -> DataUpdater {
        DataUpdater {
            store,
            state: Mutex::new(State::initializing()),
            changed: Condvar::new(),
        }
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    /// Replace the store contents.
    ///
    /// Returns `false` only if the store failed. A dataset that is not newer than the store is a
    /// successful no-op.
    pub fn apply_bulk_load(&self, data: DataSet, version: i64) -> bool {
        match self.store.bulk_load(data, version) {
            Ok(_) => true,
            Err(err) => {
                self.storage_failed(ErrorKind::StorageInitError, err);
                false
            }
        }
    }

    /// Insert or replace one item. Same failure policy as [`DataUpdater::apply_bulk_load`].
    pub fn apply_upsert(
        &self,
        category: Category,
        key: &str,
        item: VersionedItem,
        version: i64,
    ) -> bool {
        match self.store.upsert(category, key, item, version) {
            Ok(_) => true,
            Err(err) => {
                self.storage_failed(ErrorKind::StorageUpdateError, err);
                false
            }
        }
    }

    /// Insert or replace a batch of items as one write. Same failure policy as
    /// [`DataUpdater::apply_bulk_load`].
    pub fn apply_patch(
        &self,
        batch: Vec<(Category, String, VersionedItem)>,
        version: i64,
    ) -> bool {
        match self.store.upsert_all(batch, version) {
            Ok(_) => true,
            Err(err) => {
                self.storage_failed(ErrorKind::StorageUpdateError, err);
                false
            }
        }
    }

    /// Apply a pushed dataset: bulk load for `full`, one batch upsert for `patch`.
    ///
    /// Returns `false` if the store failed or a patch carries items that could not be parsed.
    /// Datasets of unknown type are ignored.
    pub fn apply_data(&self, data: Data) -> bool {
        let version = data.version();
        match data.event_type() {
            Some(EventType::Full) => {
                log::debug!(target: "ffc", version = version; "applying full dataset");
                self.apply_bulk_load(data.into_data_set(), version)
            }
            Some(EventType::Patch) => {
                let unparsed = data.unparsed_items();
                if unparsed > 0 {
                    log::warn!(target: "ffc", version, unparsed; "rejecting patch with items that failed to parse");
                    self.update_status(
                        StateType::Interrupted,
                        Some(ErrorInfo::new(
                            ErrorKind::DataInvalidError,
                            format!("{unparsed} patch items failed to parse"),
                        )),
                    );
                    return false;
                }
                let batch: Vec<_> = data
                    .into_data_set()
                    .into_iter()
                    .flat_map(|(category, items)| {
                        items.into_iter().map(move |(key, item)| (category, key, item))
                    })
                    .collect();
                log::debug!(target: "ffc", version = version, items = batch.len(); "applying patch");
                self.apply_patch(batch, version)
            }
            None => true,
        }
    }

    fn storage_failed(&self, kind: ErrorKind, err: StorageError) {
        log::warn!(target: "ffc", "data storage error: {err}, data will be requested again");
        self.update_status(StateType::Interrupted, Some(ErrorInfo::new(kind, err.to_string())));
    }

    /// Record a state transition.
    ///
    /// `Interrupted` while still `Initializing` keeps `Initializing`. Nothing is recorded (and
    /// waiters are not woken) if the state does not change and no error is given. `Off` is never
    /// left.
    pub fn update_status(&self, new_state: StateType, error: Option<ErrorInfo>) {
        let mut state = self.lock();
        let old_state = state.state_type;

        if old_state == StateType::Off {
            return;
        }

        let new_state = if new_state == StateType::Interrupted && old_state == StateType::Initializing
        {
            StateType::Initializing
        } else {
            new_state
        };

        if new_state != old_state || error.is_some() {
            let since = if new_state == old_state {
                state.since
            } else {
                Utc::now()
            };
            log::debug!(target: "ffc", from:? = old_state, to:? = new_state; "state transition");
            *state = State {
                state_type: new_state,
                since,
                error,
            };
            self.changed.notify_all();
        }
    }

    /// Block until `target` is reached.
    ///
    /// Returns `false` once the state is `Off` (unless `Off` is the target) or when `timeout`
    /// elapses. A zero timeout waits indefinitely.
    pub fn wait_for(&self, target: StateType, timeout: Duration) -> bool {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.state_type == target {
                return true;
            }
            if state.state_type == StateType::Off {
                return false;
            }
            state = match deadline {
                None => match self.changed.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                },
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    match self.changed.wait_timeout(state, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
            };
        }
    }

    pub fn current_state(&self) -> State {
        self.lock().clone()
    }

    pub fn version(&self) -> i64 {
        self.store.version()
    }

    pub fn storage_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State is plain data, replaced in one assignment. It is always consistent.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
