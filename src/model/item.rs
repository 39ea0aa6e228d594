use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use super::{FeatureFlag, Segment, UserTag};

/// The kind of data stored in the replica. Each category is an independent id → item map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Flags,
    Segments,
    Tags,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Flags => "flags",
            Category::Segments => "segments",
            Category::Tags => "tags",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Flag,
    Segment,
    Tag,
    ArchivedPlaceholder,
}

/// Anything the service versions by timestamp.
pub trait Versioned {
    fn id(&self) -> &str;
    fn timestamp(&self) -> i64;
    fn is_archived(&self) -> bool;
}

macro_rules! impl_versioned {
    ($($ty:ty),*) => {
        $(impl Versioned for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn timestamp(&self) -> i64 {
                self.timestamp
            }
            fn is_archived(&self) -> bool {
                self.is_archived
            }
        })*
    };
}

impl_versioned!(FeatureFlag, Segment, UserTag);

/// Tombstone left in place of a deleted item so stale updates cannot resurrect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedItem {
    pub id: String,
    pub timestamp: i64,
}

/// An item as stored in the data store.
#[derive(Debug, Clone, PartialEq, From)]
pub enum VersionedItem {
    Flag(FeatureFlag),
    Segment(Segment),
    Tag(UserTag),
    Archived(ArchivedItem),
}

impl VersionedItem {
    /// Wrap an item received from the service, replacing archived items with a tombstone.
    pub fn new<T>(item: T) -> VersionedItem
    where
        T: Versioned + Into<VersionedItem>,
    {
        if item.is_archived() {
            VersionedItem::archived(item.id(), item.timestamp())
        } else {
            item.into()
        }
    }

    pub fn archived(id: impl Into<String>, timestamp: i64) -> VersionedItem {
        VersionedItem::Archived(ArchivedItem {
            id: id.into(),
            timestamp,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            VersionedItem::Flag(it) => &it.id,
            VersionedItem::Segment(it) => &it.id,
            VersionedItem::Tag(it) => &it.id,
            VersionedItem::Archived(it) => &it.id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            VersionedItem::Flag(it) => it.timestamp,
            VersionedItem::Segment(it) => it.timestamp,
            VersionedItem::Tag(it) => it.timestamp,
            VersionedItem::Archived(it) => it.timestamp,
        }
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, VersionedItem::Archived(_))
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            VersionedItem::Flag(_) => ItemKind::Flag,
            VersionedItem::Segment(_) => ItemKind::Segment,
            VersionedItem::Tag(_) => ItemKind::Tag,
            VersionedItem::Archived(_) => ItemKind::ArchivedPlaceholder,
        }
    }

    pub fn as_flag(&self) -> Option<&FeatureFlag> {
        match self {
            VersionedItem::Flag(flag) => Some(flag),
            _ => None,
        }
    }

    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            VersionedItem::Segment(segment) => Some(segment),
            _ => None,
        }
    }
}

/// Items grouped by category then keyed by id, as handed to the data store.
pub type DataSet = HashMap<Category, HashMap<String, VersionedItem>>;

#[cfg(test)]
mod tests {
    use super::{ItemKind, VersionedItem};
    use crate::model::UserTag;

    fn tag(archived: bool) -> UserTag {
        UserTag {
            id: "t1".to_owned(),
            is_archived: archived,
            timestamp: 42,
            request_property: None,
            source: None,
            user_property: None,
        }
    }

    #[test]
    fn archived_items_become_placeholders() {
        let item = VersionedItem::new(tag(true));
        assert_eq!(item.kind(), ItemKind::ArchivedPlaceholder);
        assert_eq!(item.id(), "t1");
        assert_eq!(item.timestamp(), 42);
        assert!(item.is_archived());
    }

    #[test]
    fn live_items_are_kept() {
        let item = VersionedItem::new(tag(false));
        assert_eq!(item.kind(), ItemKind::Tag);
        assert!(!item.is_archived());
    }
}
