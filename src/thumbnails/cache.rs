//! Persistent thumbnail cache with an in-memory LRU layer.
//!
//! - Disk: one lossless PNG per (path, size), named `thumb_<xxh3>.png`
//! - Memory: LRU of decoded rasters, keyed like the disk files
//!
//! An entry is valid only while its storage time is strictly newer than the
//! source's modification time. The storage time is the cache file's own
//! mtime, so both layers agree on staleness.

use std::fs;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use directories::ProjectDirs;
use image::{ImageFormat, RgbaImage};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::CacheError;

/// Bump when thumbnail rendering changes so old files stop matching.
const THUMB_CACHE_VERSION: u8 = 1;

const FILE_PREFIX: &str = "thumb_";
const FILE_SUFFIX: &str = ".png";

/// Deterministic key for a (path, size) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hash: u64,
}

impl CacheKey {
    pub fn new(path: &Path, size: u32) -> Self {
        let path_str = path.to_string_lossy();
        let mut data = Vec::with_capacity(path_str.len() + 5);
        data.push(THUMB_CACHE_VERSION);
        data.extend_from_slice(path_str.as_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        Self {
            hash: xxh3_64(&data),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{:016x}{}", FILE_PREFIX, self.hash, FILE_SUFFIX)
    }

    /// Whether `name` follows the cache's file naming convention.
    pub fn is_cache_file_name(name: &str) -> bool {
        name.strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            .is_some_and(|hex| hex.len() == 16 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
    }
}

struct MemoryEntry {
    stored_at: SystemTime,
    image: Arc<RgbaImage>,
}

pub struct ThumbnailDiskCache {
    cache_dir: PathBuf,
    memory: Mutex<LruCache<u64, MemoryEntry>>,
}

impl ThumbnailDiskCache {
    /// Opens (creating if needed) a cache rooted at `cache_dir`, keeping up
    /// to `memory_entries` rasters in memory.
    pub fn new(cache_dir: PathBuf, memory_entries: usize) -> Result<Self, CacheError> {
        fs::create_dir_all(&cache_dir)?;
        let capacity = NonZeroUsize::new(memory_entries).unwrap_or(NonZeroUsize::MIN);
        debug!(?cache_dir, memory_entries, "Initialized thumbnail cache");

        Ok(Self {
            cache_dir,
            memory: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// The per-user cache location, e.g. `~/.cache/mediagrid/thumbs`.
    pub fn default_cache_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mediagrid").map(|dirs| dirs.cache_dir().join("thumbs"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn disk_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(key.file_name())
    }

    /// Returns the cached raster for (path, size) if it is newer than
    /// `source_mtime`.
    pub fn lookup(
        &self,
        path: &Path,
        size: u32,
        source_mtime: SystemTime,
    ) -> Result<Option<Arc<RgbaImage>>, CacheError> {
        let key = CacheKey::new(path, size);

        if let Some(entry) = self.memory.lock().get(&key.hash) {
            if entry.stored_at > source_mtime {
                trace!(?path, size, "Memory cache hit");
                return Ok(Some(Arc::clone(&entry.image)));
            }
        }

        let disk_path = self.disk_path(&key);
        let stored_at = match fs::metadata(&disk_path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(?path, size, "Cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if stored_at <= source_mtime {
            trace!(?path, size, "Cache entry is stale");
            return Ok(None);
        }

        let image = Arc::new(image::open(&disk_path)?.into_rgba8());
        self.memory.lock().put(
            key.hash,
            MemoryEntry {
                stored_at,
                image: Arc::clone(&image),
            },
        );
        trace!(?path, size, "Disk cache hit");
        Ok(Some(image))
    }

    /// Persists a raster for (path, size), replacing any previous entry.
    ///
    /// The file is written next to its final name and renamed into place,
    /// so readers never see a partial PNG.
    pub fn store(&self, path: &Path, size: u32, image: &Arc<RgbaImage>) -> Result<(), CacheError> {
        let key = CacheKey::new(path, size);
        let disk_path = self.disk_path(&key);
        let tmp_path = disk_path.with_extension("png.tmp");

        fs::create_dir_all(&self.cache_dir)?;
        if let Err(e) = image.save_with_format(&tmp_path, ImageFormat::Png) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp_path, &disk_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        let stored_at = fs::metadata(&disk_path)?.modified()?;
        self.memory.lock().put(
            key.hash,
            MemoryEntry {
                stored_at,
                image: Arc::clone(image),
            },
        );
        trace!(?path, size, ?disk_path, "Stored thumbnail");
        Ok(())
    }

    /// Removes every cache file and empties the memory layer.
    ///
    /// Returns the number of files removed. Files not following the naming
    /// convention are left alone.
    pub fn clear(&self) -> Result<usize, CacheError> {
        self.memory.lock().clear();

        let mut removed = 0;
        for path in self.cache_files()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(?path, error = %e, "Failed to remove cached thumbnail"),
            }
        }

        debug!(cache_dir = ?self.cache_dir, removed, "Cleared thumbnail cache");
        Ok(removed)
    }

    /// Total size of all cache files in bytes.
    pub fn size_bytes(&self) -> Result<u64, CacheError> {
        let mut total = 0;
        for path in self.cache_files()? {
            total += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        }
        Ok(total)
    }

    pub fn entry_count(&self) -> Result<usize, CacheError> {
        Ok(self.cache_files()?.len())
    }

    pub fn memory_entry_count(&self) -> usize {
        self.memory.lock().len()
    }

    fn cache_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let is_cache_file = entry
                .file_name()
                .to_str()
                .is_some_and(CacheKey::is_cache_file_name);
            if is_cache_file && entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}
