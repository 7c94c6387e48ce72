//! Thumbnail pipeline.
//!
//! - `codec` - decoding and raster post-processing
//! - `cache` - persistent (path, size) → raster store with an LRU in front
//! - `queue` - deduplicated pending requests
//! - `pipeline` - one request to one event
//! - `generator` - batching worker and the request surface

pub mod cache;
pub mod codec;
pub mod generator;
pub mod pipeline;
pub mod queue;

pub use cache::{CacheKey, ThumbnailDiskCache};
pub use codec::{ImageCodec, MediaCodec};
pub use generator::{
    GenerationProgress, ThumbnailConfig, ThumbnailGenerator, ThumbnailSink, MAX_THUMBNAIL_SIZE,
};
pub use pipeline::{Thumbnail, ThumbnailEvent, ThumbnailSource};
pub use queue::ThumbnailRequest;
