//! In-memory index of discovered media.
//!
//! Every operation takes the single index lock for the duration of a list
//! append and two map inserts (or a copy for reads). Readers always get an
//! owned snapshot, so iteration never observes a half-applied `add` or `clear`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::media_item::MediaItem;

#[derive(Default)]
struct IndexInner {
    items: Vec<Arc<MediaItem>>,
    positions: HashMap<PathBuf, usize>,
    by_folder: HashMap<PathBuf, Vec<Arc<MediaItem>>>,
    by_hash: HashMap<String, Arc<MediaItem>>,
}

impl IndexInner {
    fn replace(&mut self, pos: usize, item: Arc<MediaItem>) {
        let old = std::mem::replace(&mut self.items[pos], Arc::clone(&item));

        if let Some(list) = self.by_folder.get_mut(&old.folder) {
            list.retain(|i| i.path != old.path);
            if list.is_empty() {
                self.by_folder.remove(&old.folder);
            }
        }
        if let Some(hash) = old.content_hash() {
            if self.by_hash.get(hash).is_some_and(|i| i.path == old.path) {
                self.by_hash.remove(hash);
            }
        }

        self.index_derived(item);
    }

    fn index_derived(&mut self, item: Arc<MediaItem>) {
        if let Some(hash) = item.content_hash() {
            self.by_hash.insert(hash.to_string(), Arc::clone(&item));
        }
        self.by_folder.entry(item.folder.clone()).or_default().push(item);
    }
}

/// Thread-safe collection of media items indexed by path, folder and hash.
#[derive(Default)]
pub struct PhotoIndex {
    inner: Mutex<IndexInner>,
}

impl PhotoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item. An item with the same path replaces the previous one,
    /// keeping the path unique across the master list and the folder index.
    ///
    /// Returns `false` if an existing entry was replaced.
    pub fn add(&self, item: Arc<MediaItem>) -> bool {
        let mut inner = self.inner.lock();

        if let Some(&pos) = inner.positions.get(&item.path) {
            inner.replace(pos, item);
            return false;
        }

        let pos = inner.items.len();
        inner.positions.insert(item.path.clone(), pos);
        inner.items.push(Arc::clone(&item));
        inner.index_derived(item);
        true
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        *inner = IndexInner::default();
        debug!("Cleared photo index");
    }

    pub fn count(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// All items, newest effective creation time first. Ties are broken by
    /// path so the order is stable between calls.
    pub fn all_sorted(&self) -> Vec<Arc<MediaItem>> {
        let mut items = self.inner.lock().items.clone();
        items.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.path.cmp(&b.path)));
        items
    }

    /// Items directly inside `folder`, in discovery order.
    pub fn by_folder(&self, folder: &Path) -> Vec<Arc<MediaItem>> {
        self.inner
            .lock()
            .by_folder
            .get(folder)
            .cloned()
            .unwrap_or_default()
    }

    pub fn by_hash(&self, hash: &str) -> Option<Arc<MediaItem>> {
        self.inner.lock().by_hash.get(hash).cloned()
    }

    pub fn by_path(&self, path: &Path) -> Option<Arc<MediaItem>> {
        let inner = self.inner.lock();
        inner.positions.get(path).map(|&pos| Arc::clone(&inner.items[pos]))
    }

    /// Every folder that directly contains at least one item, sorted.
    pub fn folders(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = self.inner.lock().by_folder.keys().cloned().collect();
        folders.sort();
        folders
    }

    /// Case-insensitive substring search on the display name.
    pub fn search(&self, query: &str) -> Vec<Arc<MediaItem>> {
        let query = query.to_lowercase();
        self.inner
            .lock()
            .items
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&query))
            .cloned()
            .collect()
    }

    /// Groups of two or more items sharing a non-empty content hash.
    ///
    /// Items without a hash (hashing disabled or failed) never appear.
    /// Groups are ordered by first discovery, members in discovery order.
    pub fn find_duplicate_groups(&self) -> Vec<Vec<Arc<MediaItem>>> {
        let inner = self.inner.lock();

        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<Arc<MediaItem>>> = HashMap::new();
        for item in &inner.items {
            let Some(hash) = item.content_hash() else {
                continue;
            };
            let group = groups.entry(hash).or_insert_with(|| {
                order.push(hash);
                Vec::new()
            });
            group.push(Arc::clone(item));
        }

        let duplicates: Vec<Vec<Arc<MediaItem>>> = order
            .into_iter()
            .filter_map(|hash| groups.remove(hash))
            .filter(|group| group.len() > 1)
            .collect();
        duplicates
    }
}
