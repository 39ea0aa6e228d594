//! Flag evaluation.
//!
//! [`Evaluator`] is a pure function of a flag, a user and a [`Lookup`] for the flags and segments
//! the flag refers to. It never fails: malformed data degrades to the flag's disabled variation.
mod evaluator;
mod rules;

use serde::{Serialize, Serializer};

pub use evaluator::{Evaluator, Lookup, MAX_DEPTH};

/// Why a value was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    FlagOff,
    PrerequisiteFailed,
    TargetMatch,
    RuleMatch,
    Fallthrough,
    /// Evaluation hit malformed data (e.g., a prerequisite cycle).
    Error,
    ClientNotReady,
    FlagNotFound,
    UserNotSpecified,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::FlagOff => "flag off",
            Reason::PrerequisiteFailed => "prerequisite failed",
            Reason::TargetMatch => "target match",
            Reason::RuleMatch => "rule match",
            Reason::Fallthrough => "fall through all rules",
            Reason::Error => "error in evaluation",
            Reason::ClientNotReady => "client not ready",
            Reason::FlagNotFound => "flag not found",
            Reason::UserNotSpecified => "user not specified",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of evaluating a flag for a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub value: String,
    pub variation_id: i32,
    pub reason: Reason,
    pub send_to_experiment: bool,
}

/// Malformed flag data detected while evaluating.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum EvalError {
    #[error("{0} refers back to itself through prerequisites or segments")]
    Cycle(String),
    #[error("prerequisites or segments are nested deeper than {MAX_DEPTH} levels")]
    TooDeep,
}
