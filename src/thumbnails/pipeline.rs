//! Turns one request into exactly one event.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use image::RgbaImage;
use tracing::{debug, trace, warn};

use super::cache::ThumbnailDiskCache;
use super::codec::{error_marker, round_corners, video_placeholder, MediaCodec};
use super::queue::ThumbnailRequest;
use crate::error::CodecError;
use crate::models::{MediaFormats, MediaKind};

/// Where a delivered raster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSource {
    Cache,
    Decoded,
    VideoPlaceholder,
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub path: PathBuf,
    pub size: u32,
    pub image: Arc<RgbaImage>,
    pub source: ThumbnailSource,
}

/// Terminal outcome of a thumbnail request.
#[derive(Debug, Clone)]
pub enum ThumbnailEvent {
    Ready(Thumbnail),
    /// Generation failed. `placeholder` is an error marker of the requested
    /// size so the slot can still be filled.
    Failed {
        path: PathBuf,
        size: u32,
        message: String,
        placeholder: Arc<RgbaImage>,
    },
}

impl ThumbnailEvent {
    pub fn path(&self) -> &std::path::Path {
        match self {
            ThumbnailEvent::Ready(thumb) => &thumb.path,
            ThumbnailEvent::Failed { path, .. } => path,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            ThumbnailEvent::Ready(thumb) => thumb.size,
            ThumbnailEvent::Failed { size, .. } => *size,
        }
    }

    /// The raster to display, whether real or the error marker.
    pub fn image(&self) -> &Arc<RgbaImage> {
        match self {
            ThumbnailEvent::Ready(thumb) => &thumb.image,
            ThumbnailEvent::Failed { placeholder, .. } => placeholder,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ThumbnailEvent::Failed { .. })
    }
}

pub struct ThumbnailPipeline {
    codec: Arc<dyn MediaCodec>,
    cache: Option<ThumbnailDiskCache>,
    formats: MediaFormats,
    corner_radius: u32,
}

impl ThumbnailPipeline {
    pub fn new(
        codec: Arc<dyn MediaCodec>,
        cache: Option<ThumbnailDiskCache>,
        formats: MediaFormats,
        corner_radius: u32,
    ) -> Self {
        Self {
            codec,
            cache,
            formats,
            corner_radius,
        }
    }

    pub fn cache(&self) -> Option<&ThumbnailDiskCache> {
        self.cache.as_ref()
    }

    pub fn render(&self, req: &ThumbnailRequest) -> ThumbnailEvent {
        match self.try_render(req) {
            Ok(thumb) => ThumbnailEvent::Ready(thumb),
            Err(e) => {
                warn!(path = ?req.path, size = req.size, error = %e, "Failed to generate thumbnail");
                ThumbnailEvent::Failed {
                    path: req.path.clone(),
                    size: req.size,
                    message: e.to_string(),
                    placeholder: Arc::new(error_marker(req.size, self.corner_radius)),
                }
            }
        }
    }

    fn try_render(&self, req: &ThumbnailRequest) -> Result<Thumbnail, CodecError> {
        let path = &req.path;
        let source_mtime = source_mtime(req)?;

        if let Some(cache) = &self.cache {
            match cache.lookup(path, req.size, source_mtime) {
                Ok(Some(image)) => {
                    return Ok(Thumbnail {
                        path: path.clone(),
                        size: req.size,
                        image,
                        source: ThumbnailSource::Cache,
                    })
                }
                Ok(None) => {}
                Err(e) => debug!(?path, error = %e, "Unreadable cache entry, regenerating"),
            }
        }

        let (image, source) = match self.formats.classify(path) {
            Some(MediaKind::Video) => (
                video_placeholder(req.size, self.corner_radius),
                ThumbnailSource::VideoPlaceholder,
            ),
            Some(MediaKind::Image) => {
                let mut image = self.codec.decode(path, req.size)?;
                round_corners(&mut image, self.corner_radius);
                (image, ThumbnailSource::Decoded)
            }
            None => return Err(CodecError::Unsupported(path.clone())),
        };
        let image = Arc::new(image);

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(path, req.size, &image) {
                warn!(?path, error = %e, "Failed to persist thumbnail");
            }
        }

        trace!(?path, size = req.size, ?source, "Rendered thumbnail");
        Ok(Thumbnail {
            path: path.clone(),
            size: req.size,
            image,
            source,
        })
    }
}

fn source_mtime(req: &ThumbnailRequest) -> Result<SystemTime, CodecError> {
    fs::metadata(&req.path)
        .and_then(|meta| meta.modified())
        .map_err(|source| CodecError::Io {
            path: req.path.clone(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumbnails::codec::ImageCodec;
    use tempfile::tempdir;

    fn pipeline(cache: Option<ThumbnailDiskCache>) -> ThumbnailPipeline {
        ThumbnailPipeline::new(Arc::new(ImageCodec), cache, MediaFormats::default(), 8)
    }

    #[test]
    fn test_missing_file_yields_error_marker() {
        let event = pipeline(None).render(&ThumbnailRequest::new("/nonexistent/x.jpg", 64));
        match event {
            ThumbnailEvent::Failed {
                size, placeholder, ..
            } => {
                assert_eq!(size, 64);
                assert_eq!(placeholder.dimensions(), (64, 64));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_video_gets_placeholder() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        fs::write(&path, b"\0\0\0\x18ftypmp42").unwrap();

        let event = pipeline(None).render(&ThumbnailRequest::new(&path, 96));
        let ThumbnailEvent::Ready(thumb) = event else {
            panic!("expected a placeholder");
        };
        assert_eq!(thumb.source, ThumbnailSource::VideoPlaceholder);
        assert_eq!(thumb.image.dimensions(), (96, 96));
    }

    #[test]
    fn test_unrecognized_extension_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"text").unwrap();

        assert!(pipeline(None)
            .render(&ThumbnailRequest::new(&path, 64))
            .is_failure());
    }

    #[test]
    fn test_failed_cache_write_still_returns_raster() {
        let src_dir = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let cache_path = scratch.path().join("thumbs");
        let path = src_dir.path().join("photo.png");
        RgbaImage::from_pixel(80, 40, image::Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();

        let cache = ThumbnailDiskCache::new(cache_path.clone(), 8).unwrap();
        // A plain file where the directory was makes every write fail.
        fs::remove_dir_all(&cache_path).unwrap();
        fs::write(&cache_path, b"not a directory").unwrap();

        let renderer = pipeline(Some(cache));
        let req = ThumbnailRequest::new(&path, 64);
        for _ in 0..2 {
            let ThumbnailEvent::Ready(thumb) = renderer.render(&req) else {
                panic!("expected the raster despite the cache failure");
            };
            // Nothing was persisted, so both renders decode.
            assert_eq!(thumb.source, ThumbnailSource::Decoded);
            assert_eq!(thumb.image.dimensions(), (64, 32));
        }
        assert!(cache_path.is_file());
    }

    #[test]
    fn test_cached_and_fresh_rasters_match() {
        let src_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let path = src_dir.path().join("photo.png");
        RgbaImage::from_pixel(300, 150, image::Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let req = ThumbnailRequest::new(&path, 100);
        let fresh = pipeline(Some(
            ThumbnailDiskCache::new(cache_dir.path().to_path_buf(), 8).unwrap(),
        ))
        .render(&req);
        // A new pipeline has an empty memory layer, so this reads the PNG back.
        let cached = pipeline(Some(
            ThumbnailDiskCache::new(cache_dir.path().to_path_buf(), 8).unwrap(),
        ))
        .render(&req);

        let (ThumbnailEvent::Ready(fresh), ThumbnailEvent::Ready(cached)) = (fresh, cached) else {
            panic!("expected both renders to succeed");
        };
        assert_eq!(fresh.source, ThumbnailSource::Decoded);
        assert_eq!(cached.source, ThumbnailSource::Cache);
        assert_eq!(fresh.image.dimensions(), (100, 50));
        assert_eq!(fresh.image.as_raw(), cached.image.as_raw());
    }
}
