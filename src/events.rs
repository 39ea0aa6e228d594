use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{eval::EvalResult, user::FfcUser};

/// Record of one evaluation that served a real flag value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagEvent {
    pub flag_key: String,
    pub user: FfcUser,
    pub variation_id: i32,
    pub value: String,
    pub timestamp: DateTime<Utc>,
    pub send_to_experiment: bool,
}

impl FlagEvent {
    pub(crate) fn new(flag_key: &str, user: &FfcUser, result: &EvalResult) -> FlagEvent {
        FlagEvent {
            flag_key: flag_key.to_owned(),
            user: user.clone(),
            variation_id: result.variation_id,
            value: result.value.clone(),
            timestamp: Utc::now(),
            send_to_experiment: result.send_to_experiment,
        }
    }
}

/// Receives [`FlagEvent`]s to forward them to the analytics pipeline.
///
/// Called synchronously on the evaluating thread, implementations should hand the event off
/// quickly.
pub trait EventSink {
    fn send(&self, event: FlagEvent);
}

/// Drops every event.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn send(&self, _event: FlagEvent) {}
}

impl<T: Fn(FlagEvent)> EventSink for T {
    fn send(&self, event: FlagEvent) {
        self(event);
    }
}
