//! The media library service: one per application instance.
//!
//! Owns the index, the scanner and the thumbnail generator, and exposes the
//! commands a front end issues plus the event streams it consumes.

use std::path::PathBuf;
use std::sync::Arc;

use flume::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::{CacheError, GeneratorError, ScanError};
use crate::models::PhotoIndex;
use crate::scanner::{FileScanner, ScanEvent, ScanState};
use crate::thumbnails::{GenerationProgress, ThumbnailEvent, ThumbnailGenerator, ThumbnailSink};
use crate::viewport::ViewportWindow;

pub struct MediaLibrary {
    config: Config,
    index: Arc<PhotoIndex>,
    scanner: FileScanner,
    thumbnails: Arc<ThumbnailGenerator>,
    scan_tx: Sender<ScanEvent>,
    scan_rx: Receiver<ScanEvent>,
}

impl MediaLibrary {
    pub fn new(config: Config) -> Result<Self, GeneratorError> {
        let config = config.sanitized();
        let index = Arc::new(PhotoIndex::new());
        let scanner = FileScanner::with_config(config.scan.clone(), Arc::clone(&index));
        let thumbnails = Arc::new(ThumbnailGenerator::new(
            &config.thumbnails,
            config.scan.formats.clone(),
        )?);
        let (scan_tx, scan_rx) = flume::unbounded();

        info!(
            cache = thumbnails.cache().is_some(),
            size = config.thumbnails.size,
            "Media library ready"
        );

        Ok(Self {
            config,
            index,
            scanner,
            thumbnails,
            scan_tx,
            scan_rx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<PhotoIndex> {
        &self.index
    }

    pub fn thumbnails(&self) -> &Arc<ThumbnailGenerator> {
        &self.thumbnails
    }

    /// Starts a background scan of `root`. The index is cleared first.
    pub fn start_scan(&self, root: impl Into<PathBuf>) -> Result<CancellationToken, ScanError> {
        self.scanner.start(root, self.scan_tx.clone())
    }

    pub fn cancel_scan(&self) {
        self.scanner.cancel();
    }

    /// Blocks until the current background scan has ended.
    pub fn wait_for_scan(&self) -> ScanState {
        self.scanner.wait()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    pub fn scan_events(&self) -> Receiver<ScanEvent> {
        self.scan_rx.clone()
    }

    pub fn thumbnail_events(&self) -> Receiver<ThumbnailEvent> {
        self.thumbnails.events()
    }

    pub fn thumbnail_progress(&self) -> Receiver<GenerationProgress> {
        self.thumbnails.progress()
    }

    pub fn request_thumbnail(
        &self,
        path: impl Into<PathBuf>,
        size: u32,
    ) -> Result<bool, GeneratorError> {
        self.thumbnails.request_one(path, size)
    }

    pub fn request_thumbnails_batch<I, P>(&self, paths: I, size: u32) -> Result<usize, GeneratorError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.thumbnails.request_batch(paths, size)
    }

    pub fn cancel_thumbnails(&self) -> usize {
        self.thumbnails.cancel_all()
    }

    pub fn clear_thumbnail_cache(&self) -> Result<usize, CacheError> {
        self.thumbnails.clear_cache()
    }

    /// A window over this library's thumbnails, using the configured
    /// windowing settings and thumbnail size.
    pub fn new_viewport(&self) -> ViewportWindow {
        let sink: Arc<dyn ThumbnailSink> = Arc::clone(&self.thumbnails) as Arc<dyn ThumbnailSink>;
        ViewportWindow::new(self.config.window.clone(), sink, self.config.thumbnails.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn library(cache_dir: &TempDir) -> MediaLibrary {
        let mut config = Config::default();
        config.thumbnails.cache_dir = Some(cache_dir.path().to_path_buf());
        config.thumbnails.tick_ms = 5;
        config.thumbnails.size = 64;
        MediaLibrary::new(config).unwrap()
    }

    fn create_image(path: &Path) {
        image::RgbImage::from_pixel(40, 30, image::Rgb([0, 90, 180]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_scan_then_window_thumbnails() {
        let photos = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        for i in 0..6 {
            create_image(&photos.path().join(format!("{}.png", i)));
        }
        std::fs::write(photos.path().join("clip.mp4"), b"not really a video").unwrap();

        let lib = library(&cache_dir);
        let scan_events = lib.scan_events();
        lib.start_scan(photos.path()).unwrap();
        assert_eq!(lib.wait_for_scan(), ScanState::Finished);

        let events: Vec<_> = scan_events.drain().collect();
        assert!(matches!(events.last(), Some(ScanEvent::Finished { count: 7 })));
        assert_eq!(lib.index().count(), 7);

        let mut window = lib.new_viewport();
        window.set_viewport(800, 600);
        let update = window.set_items(lib.index().all_sorted());
        assert_eq!(update.requested.len(), 7);

        let rx = lib.thumbnail_events();
        for _ in 0..7 {
            let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            assert!(!event.is_failure());
            assert!(window.on_thumbnail_event(&event));
        }
        let slot = window.materialized(&photos.path().join("0.png")).unwrap();
        assert_eq!(slot.image.as_ref().unwrap().dimensions(), (40, 30));
    }

    #[test]
    fn test_oversized_window_thumbnails_still_delivered() {
        let photos = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        for i in 0..3 {
            create_image(&photos.path().join(format!("{}.png", i)));
        }

        let lib = library(&cache_dir);
        lib.start_scan(photos.path()).unwrap();
        assert_eq!(lib.wait_for_scan(), ScanState::Finished);

        let mut window = lib.new_viewport();
        window.set_viewport(100_000, 100_000);
        window.set_items(lib.index().all_sorted());
        let update = window.set_thumbnail_size(5000);
        assert_eq!(window.thumbnail_size(), crate::thumbnails::MAX_THUMBNAIL_SIZE);
        assert_eq!(update.requested.len(), 3);

        // Events for the first size may still arrive and are ignored.
        let rx = lib.thumbnail_events();
        let mut attached = 0;
        while attached < 3 {
            let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            if window.on_thumbnail_event(&event) {
                assert!(!event.is_failure());
                attached += 1;
            }
        }
        assert_eq!(window.materialized_count(), 3);
    }

    #[test]
    fn test_commands_reject_bad_input() {
        let cache_dir = tempdir().unwrap();
        let lib = library(&cache_dir);

        assert!(matches!(
            lib.start_scan("/nonexistent/library"),
            Err(ScanError::InvalidRoot(_))
        ));
        assert_eq!(lib.scan_state(), ScanState::Idle);
        assert!(matches!(
            lib.request_thumbnail("/a.jpg", 0),
            Err(GeneratorError::InvalidSize(0))
        ));
    }

    #[test]
    fn test_clear_thumbnail_cache() {
        let photos = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let path = photos.path().join("a.png");
        create_image(&path);
        let past = std::time::SystemTime::now() - Duration::from_secs(600);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(past)).unwrap();

        let lib = library(&cache_dir);
        let rx = lib.thumbnail_events();
        assert_eq!(lib.request_thumbnails_batch([path.clone()], 64).unwrap(), 1);
        rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(lib.clear_thumbnail_cache().unwrap(), 1);
        assert_eq!(lib.cancel_thumbnails(), 0);
    }
}
