//! Streaming protocol envelopes.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{nullable, Category, DataSet, FeatureFlag, Segment, TryParse, UserTag, VersionedItem};

pub(crate) const DATA_SYNC: &str = "data-sync";
pub(crate) const PING: &str = "ping";
pub(crate) const PONG: &str = "pong";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundMessage<'a, T> {
    message_type: &'a str,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct SyncRequest {
    timestamp: i64,
}

/// Request sent right after the connection opens, carrying the locally known version.
pub fn sync_request(version: i64) -> String {
    serialize(&OutboundMessage {
        message_type: DATA_SYNC,
        data: Some(SyncRequest { timestamp: version }),
    })
}

/// Keep-alive probe.
pub fn ping() -> String {
    serialize(&OutboundMessage::<()> {
        message_type: PING,
        data: None,
    })
}

fn serialize<T: Serialize>(message: &T) -> String {
    // Serializing plain structs with string and integer fields cannot fail.
    serde_json::to_string(message).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageHeader {
    message_type: String,
}

#[derive(Debug, Deserialize)]
struct DataSyncEnvelope {
    data: Option<Data>,
}

/// A decoded inbound message.
#[derive(Debug)]
pub enum Inbound {
    DataSync(Box<Data>),
    Pong,
    /// Anything the client does not act upon (unknown message types, a data-sync without data).
    Ignored(String),
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Inbound, serde_json::Error> {
        let header: MessageHeader = serde_json::from_str(text)?;
        let inbound = match header.message_type.as_str() {
            DATA_SYNC => match serde_json::from_str::<DataSyncEnvelope>(text)?.data {
                Some(data) => Inbound::DataSync(Box::new(data)),
                None => Inbound::Ignored(header.message_type),
            },
            PONG => Inbound::Pong,
            _ => Inbound::Ignored(header.message_type),
        };
        Ok(inbound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Full,
    Patch,
}

/// Dataset pushed by the server (or supplied as offline bootstrap).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(default, deserialize_with = "nullable")]
    pub event_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub feature_flags: Vec<TryParse<FeatureFlag>>,
    #[serde(default, deserialize_with = "nullable")]
    pub segments: Vec<TryParse<Segment>>,
    #[serde(default, deserialize_with = "nullable")]
    pub user_tags: Vec<TryParse<UserTag>>,
}

impl Data {
    /// `None` if the event type is neither `full` nor `patch`.
    pub fn event_type(&self) -> Option<EventType> {
        if self.event_type.eq_ignore_ascii_case("full") {
            Some(EventType::Full)
        } else if self.event_type.eq_ignore_ascii_case("patch") {
            Some(EventType::Patch)
        } else {
            None
        }
    }

    /// Maximum item timestamp in the dataset, 0 if empty.
    pub fn version(&self) -> i64 {
        let flags = timestamps(&self.feature_flags);
        let segments = timestamps(&self.segments);
        let tags = timestamps(&self.user_tags);
        flags.chain(segments).chain(tags).max().unwrap_or(0).max(0)
    }

    /// Number of items that failed to parse, not counting bare archived items.
    pub fn unparsed_items(&self) -> usize {
        unparsed(&self.feature_flags) + unparsed(&self.segments) + unparsed(&self.user_tags)
    }

    /// Convert to the store's representation. Archived items become placeholders; items that
    /// failed to parse are skipped.
    pub fn into_data_set(self) -> DataSet {
        let mut set = DataSet::new();
        set.insert(Category::Flags, collect(Category::Flags, self.feature_flags));
        set.insert(Category::Segments, collect(Category::Segments, self.segments));
        set.insert(Category::Tags, collect(Category::Tags, self.user_tags));
        set
    }
}

fn timestamps<T: super::Versioned>(items: &[TryParse<T>]) -> impl Iterator<Item = i64> + '_ {
    items.iter().filter_map(|item| match item {
        TryParse::Parsed(item) => Some(item.timestamp()),
        TryParse::ParseFailed(value) => tombstone(value).map(|it| it.timestamp()),
    })
}

fn unparsed<T>(items: &[TryParse<T>]) -> usize {
    items
        .iter()
        .filter(|item| matches!(item, TryParse::ParseFailed(value) if tombstone(value).is_none()))
        .count()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tombstone {
    id: String,
    timestamp: i64,
    #[serde(default)]
    is_archived: bool,
}

/// Archived items may be sent as a bare `{id, timestamp, isArchived}`.
fn tombstone(value: &serde_json::Value) -> Option<VersionedItem> {
    let stub = Tombstone::deserialize(value).ok()?;
    stub.is_archived
        .then(|| VersionedItem::archived(stub.id, stub.timestamp))
}

fn collect<T>(category: Category, items: Vec<TryParse<T>>) -> HashMap<String, VersionedItem>
where
    T: super::Versioned + Into<VersionedItem>,
{
    let mut map = HashMap::with_capacity(items.len());
    for item in items {
        match item {
            TryParse::Parsed(item) => {
                let item = VersionedItem::new(item);
                map.insert(item.id().to_owned(), item);
            }
            TryParse::ParseFailed(value) => match tombstone(&value) {
                Some(item) => {
                    map.insert(item.id().to_owned(), item);
                }
                None => {
                    log::warn!(target: "ffc", category:% = category; "skipping item that failed to parse: {value}");
                }
            },
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::{ping, sync_request, Data, EventType, Inbound};
    use crate::model::{Category, ItemKind};

    #[test]
    fn outbound_messages() {
        assert_eq!(
            sync_request(0),
            r#"{"messageType":"data-sync","data":{"timestamp":0}}"#
        );
        assert_eq!(
            sync_request(1700000000000),
            r#"{"messageType":"data-sync","data":{"timestamp":1700000000000}}"#
        );
        assert_eq!(ping(), r#"{"messageType":"ping","data":null}"#);
    }

    #[test]
    fn parse_inbound_kinds() {
        assert!(matches!(
            Inbound::parse(r#"{"messageType":"pong","data":null}"#).unwrap(),
            Inbound::Pong
        ));
        assert!(matches!(
            Inbound::parse(r#"{"messageType":"data-sync","data":null}"#).unwrap(),
            Inbound::Ignored(_)
        ));
        assert!(matches!(
            Inbound::parse(r#"{"messageType":"whatever"}"#).unwrap(),
            Inbound::Ignored(_)
        ));
        assert!(Inbound::parse("not json").is_err());
        assert!(Inbound::parse(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn event_type_is_case_insensitive() {
        let data: Data = serde_json::from_str(r#"{"eventType":"FULL"}"#).unwrap();
        assert_eq!(data.event_type(), Some(EventType::Full));
        let data: Data = serde_json::from_str(r#"{"eventType":"Patch"}"#).unwrap();
        assert_eq!(data.event_type(), Some(EventType::Patch));
        let data: Data = serde_json::from_str(r#"{"eventType":"delta"}"#).unwrap();
        assert_eq!(data.event_type(), None);
    }

    #[test]
    fn empty_dataset_has_version_zero() {
        let data: Data =
            serde_json::from_str(r#"{"eventType":"full","featureFlags":null}"#).unwrap();
        assert_eq!(data.version(), 0);
        let set = data.into_data_set();
        assert!(set.values().all(|items| items.is_empty()));
    }

    #[test]
    fn full_fixture() {
        let file = File::open("tests/data/full.json").unwrap();
        let message: serde_json::Value = serde_json::from_reader(file).unwrap();
        let Inbound::DataSync(data) = Inbound::parse(&message.to_string()).unwrap() else {
            panic!("expected data-sync");
        };
        assert_eq!(data.event_type(), Some(EventType::Full));
        assert_eq!(data.version(), 1700000000500);

        let set = data.into_data_set();
        assert_eq!(set[&Category::Flags].len(), 8);
        assert_eq!(set[&Category::Segments].len(), 2);
        assert_eq!(set[&Category::Tags].len(), 1);
        assert_eq!(
            set[&Category::Flags]["FF__1__2__3__archived-flag"].kind(),
            ItemKind::ArchivedPlaceholder
        );
    }

    #[test]
    fn bare_archived_item_becomes_placeholder() {
        let data: Data = serde_json::from_str(
            r#"{"eventType":"patch","featureFlags":[{"id":"gone","timestamp":42,"isArchived":true}]}"#,
        )
        .unwrap();
        assert_eq!(data.version(), 42);
        assert_eq!(data.unparsed_items(), 0);
        let set = data.into_data_set();
        assert_eq!(set[&Category::Flags]["gone"].kind(), ItemKind::ArchivedPlaceholder);
        assert_eq!(set[&Category::Flags]["gone"].timestamp(), 42);
    }

    #[test]
    fn unparsable_flag_is_skipped() {
        let data: Data = serde_json::from_str(
            r#"{"eventType":"patch","featureFlags":[{"id":"broken","timestamp":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(data.version(), 0);
        assert_eq!(data.unparsed_items(), 1);
        assert!(data.into_data_set()[&Category::Flags].is_empty());
    }
}
