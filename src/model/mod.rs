//! Data replicated from the feature flag service.
//!
//! [`flag`] holds the flag/segment/tag definitions in their wire shape, [`item`] wraps them into
//! the [`VersionedItem`] sum type the data store works with, and [`message`] describes the
//! streaming protocol envelopes that carry them.
use serde::{Deserialize, Deserializer, Serialize};

pub mod flag;
pub mod item;
pub mod message;

pub use flag::{
    Clause, FeatureFlag, FlagInfo, FlagStatus, Operator, PercentageRange, PercentageRollout,
    Prerequisite, Segment, SegmentRule, TargetIndividuals, TargetRule, TargetUser, UserTag,
    VariationOption,
};
pub use item::{ArchivedItem, Category, DataSet, ItemKind, Versioned, VersionedItem};
pub use message::{Data, EventType, Inbound};

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
///
/// A single flag the SDK does not understand (e.g., a newer server format) must not prevent the
/// rest of a dataset from being applied.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Deserialize an explicit `null` as the default value of `T`.
///
/// The service serializes absent lists and flags as `null` rather than omitting them.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
