//! Indexing and thumbnail core for large photo and video collections.
//!
//! - [`scanner`] walks a directory tree in the background and fills a
//!   [`PhotoIndex`](models::PhotoIndex)
//! - [`thumbnails`] renders bounded-size previews with a staleness-aware
//!   disk cache
//! - [`viewport`] keeps only the thumbnails near the visible part of a grid
//!
//! [`MediaLibrary`] ties them together behind a command/event surface.

pub mod config;
pub mod error;
pub mod library;
pub mod models;
pub mod scanner;
pub mod thumbnails;
pub mod viewport;

pub use config::Config;
pub use error::{CacheError, CodecError, ExtractionError, GeneratorError, HashError, ScanError};
pub use library::MediaLibrary;
pub use models::{MediaFormats, MediaItem, MediaKind, PhotoIndex};
pub use scanner::{ScanEvent, ScanState};
pub use thumbnails::{ThumbnailEvent, ThumbnailRequest};
pub use viewport::{ViewportWindow, WindowConfig, WindowUpdate};
