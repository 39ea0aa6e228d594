//! A thread-safe in-memory replica of flags, segments and user tags. [`DataStore`] provides
//! concurrent access for readers (e.g., flag evaluation) and a single writer (the data updater).
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use crate::model::{Category, DataSet, FeatureFlag, Segment, VersionedItem};

/// Reasons the store refuses a write. Stale versions are not errors, they are reported as
/// `Ok(false)`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    /// A thread panicked while holding the store lock.
    #[error("data store lock is poisoned")]
    Poisoned,
    /// The key an item is stored under differs from the item's own id.
    #[error("item {id:?} cannot be stored under key {key:?}")]
    KeyMismatch { key: String, id: String },
}

type Items = HashMap<String, Arc<VersionedItem>>;

/// An immutable view of the store contents at one version.
///
/// Evaluation works off a single snapshot so that flags and segments it looks up all come from
/// the same version.
#[derive(Debug, Default)]
pub struct Snapshot {
    version: i64,
    initialized: bool,
    items: HashMap<Category, Arc<Items>>,
}

impl Snapshot {
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Get an item. Archived placeholders are reported as absent.
    pub fn get(&self, category: Category, key: &str) -> Option<&Arc<VersionedItem>> {
        self.items
            .get(&category)?
            .get(key)
            .filter(|item| !item.is_archived())
    }

    /// Get all live items of a category.
    pub fn get_all(&self, category: Category) -> HashMap<String, Arc<VersionedItem>> {
        self.items
            .get(&category)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, item)| !item.is_archived())
                    .map(|(key, item)| (key.clone(), Arc::clone(item)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn flag(&self, id: &str) -> Option<&FeatureFlag> {
        self.get(Category::Flags, id)?.as_flag()
    }

    pub fn segment(&self, id: &str) -> Option<&Segment> {
        self.get(Category::Segments, id)?.as_segment()
    }

    /// Live flags, in no particular order.
    pub fn flags(&self) -> impl Iterator<Item = &FeatureFlag> {
        self.items
            .get(&Category::Flags)
            .into_iter()
            .flat_map(|items| items.values())
            .filter_map(|item| item.as_flag())
    }
}

/// `DataStore` provides a thread-safe (`Sync`) storage with copy-on-write updates.
///
/// Every write builds a new [`Snapshot`] and publishes it by replacing a single `Arc`, so readers
/// never see a partially-applied write and only hold the read lock for an `Arc` clone.
#[derive(Debug, Default)]
pub struct DataStore {
    snapshot: RwLock<Arc<Snapshot>>,
    /// Serializes writers. Taken for the whole read-modify-publish sequence.
    writer: Mutex<()>,
}

impl DataStore {
    /// Create a new empty, uninitialized store.
    pub fn new() -> Self {
        DataStore::default()
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        // A writer only holds the write lock to swap an `Arc`, so recovering from poisoning is safe
        // here: the slot always holds a complete snapshot.
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot().is_initialized()
    }

    pub fn version(&self) -> i64 {
        self.snapshot().version()
    }

    pub fn get(&self, category: Category, key: &str) -> Option<Arc<VersionedItem>> {
        self.snapshot().get(category, key).cloned()
    }

    pub fn get_all(&self, category: Category) -> HashMap<String, Arc<VersionedItem>> {
        self.snapshot().get_all(category)
    }

    /// Replace the whole contents with `data`.
    ///
    /// Returns `Ok(false)` without changing anything if `version` is not newer than the current
    /// version or if `data` holds no items at all.
    pub fn bulk_load(&self, data: DataSet, version: i64) -> Result<bool, StorageError> {
        let _writer = self.writer.lock().map_err(|_| StorageError::Poisoned)?;
        let current = self.snapshot();

        if version <= current.version || data.values().all(|items| items.is_empty()) {
            return Ok(false);
        }

        let mut items = HashMap::with_capacity(data.len());
        for (category, category_items) in data {
            let mut map = Items::with_capacity(category_items.len());
            for (key, item) in category_items {
                check_key(&key, &item)?;
                map.insert(key, Arc::new(item));
            }
            items.insert(category, Arc::new(map));
        }

        self.publish(Snapshot {
            version,
            initialized: true,
            items,
        })?;
        log::debug!(target: "ffc", version; "data storage initialized");
        Ok(true)
    }

    /// Insert or replace a single item. See [`DataStore::upsert_all`].
    pub fn upsert(
        &self,
        category: Category,
        key: &str,
        item: VersionedItem,
        version: i64,
    ) -> Result<bool, StorageError> {
        self.upsert_all(vec![(category, key.to_owned(), item)], version)
    }

    /// Insert or replace a batch of items as one write at `version`.
    ///
    /// Nothing changes unless `version` is newer than the store version. Within the batch, an
    /// item is admitted only if the item currently stored under its key (if any) is older. Returns
    /// whether any item was admitted. A successful write marks the store initialized.
    pub fn upsert_all(
        &self,
        batch: Vec<(Category, String, VersionedItem)>,
        version: i64,
    ) -> Result<bool, StorageError> {
        for (_, key, item) in &batch {
            check_key(key, item)?;
        }

        let _writer = self.writer.lock().map_err(|_| StorageError::Poisoned)?;
        let current = self.snapshot();

        if version <= current.version {
            return Ok(false);
        }

        let mut updated: HashMap<Category, Items> = HashMap::new();
        let mut admitted = 0;
        for (category, key, item) in batch {
            let category_items = updated.entry(category).or_insert_with(|| {
                current
                    .items
                    .get(&category)
                    .map(|items| Items::clone(items))
                    .unwrap_or_default()
            });
            if let Some(existing) = category_items.get(&key) {
                if existing.timestamp() >= item.timestamp() {
                    log::trace!(target: "ffc", category:%, key, version; "skipping stale item");
                    continue;
                }
            }
            log::trace!(target: "ffc", category:%, key, version; "data storage updated");
            category_items.insert(key, Arc::new(item));
            admitted += 1;
        }

        if admitted == 0 {
            return Ok(false);
        }

        let mut items = current.items.clone();
        for (category, category_items) in updated {
            items.insert(category, Arc::new(category_items));
        }
        self.publish(Snapshot {
            version,
            initialized: true,
            items,
        })?;
        Ok(true)
    }

    fn publish(&self, snapshot: Snapshot) -> Result<(), StorageError> {
        let mut slot = self.snapshot.write().map_err(|_| StorageError::Poisoned)?;
        *slot = Arc::new(snapshot);
        Ok(())
    }
}

fn check_key(key: &str, item: &VersionedItem) -> Result<(), StorageError> {
    if item.id() == key {
        Ok(())
    } else {
        Err(StorageError::KeyMismatch {
            key: key.to_owned(),
            id: item.id().to_owned(),
        })
    }
}
