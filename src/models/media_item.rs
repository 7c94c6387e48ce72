use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "ico", "svg",
];

const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "3gp", "ogv",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

/// The configured set of recognized image and video extensions.
///
/// Extensions are stored lowercase without the leading dot, so `".JPG"` and
/// `"jpg"` configure the same thing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaFormats {
    pub images: BTreeSet<String>,
    pub videos: BTreeSet<String>,
}

impl MediaFormats {
    pub fn new<I, V, S, T>(images: I, videos: V) -> Self
    where
        I: IntoIterator<Item = S>,
        V: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            images: images.into_iter().map(|e| normalize_extension(e.as_ref())).collect(),
            videos: videos.into_iter().map(|e| normalize_extension(e.as_ref())).collect(),
        }
    }

    /// Re-normalizes extensions, e.g. after deserializing user-edited settings.
    pub fn normalized(self) -> Self {
        Self::new(self.images, self.videos)
    }

    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if self.images.contains(&ext) {
            Some(MediaKind::Image)
        } else if self.videos.contains(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn is_media(&self, path: &Path) -> bool {
        self.classify(path).is_some()
    }
}

impl Default for MediaFormats {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_EXTENSIONS, DEFAULT_VIDEO_EXTENSIONS)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// One discovered photo or video. Immutable once the scanner has built it.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub path: PathBuf,
    pub name: String,
    pub kind: MediaKind,
    pub size: u64,
    /// Effective creation time: the embedded EXIF timestamp when present,
    /// otherwise the filesystem modification time.
    pub created: NaiveDateTime,
    pub modified: NaiveDateTime,
    /// 0 when unknown.
    pub width: u32,
    /// 0 when unknown.
    pub height: u32,
    pub format: String,
    pub folder: PathBuf,
    pub metadata: Option<BTreeMap<String, String>>,
    pub hash: Option<String>,
}

impl MediaItem {
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 || self.width == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// The content hash, if one was computed and is non-empty.
    pub fn content_hash(&self) -> Option<&str> {
        self.hash.as_deref().filter(|h| !h.is_empty())
    }
}

/// Format tag derived from the extension, e.g. `JPG`, or `UNKNOWN`.
pub fn format_tag(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_uppercase())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}
