//! Batched background thumbnail generation.
//!
//! Requests go into a shared [`PendingQueue`]; a single worker thread wakes
//! on every new request or on a fixed tick, takes one bounded batch, renders
//! it and emits one [`ThumbnailEvent`] per request on a flume channel, then
//! one [`GenerationProgress`] for the batch. Batches never overlap.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::cache::ThumbnailDiskCache;
use super::codec::{ImageCodec, MediaCodec};
use super::pipeline::{ThumbnailEvent, ThumbnailPipeline};
use super::queue::{PendingQueue, ThumbnailRequest};
use crate::error::{CacheError, GeneratorError};
use crate::models::MediaFormats;

/// Largest thumbnail edge the generator renders. Settings and the viewport
/// clamp to this; requests above it are rejected.
pub const MAX_THUMBNAIL_SIZE: u32 = 1024;

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Edge of the square box thumbnails are fitted into.
    pub size: u32,
    pub cache_enabled: bool,
    /// Overrides the per-user cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Requests rendered per tick.
    pub batch_size: usize,
    pub tick_ms: u64,
    pub corner_radius: u32,
    /// Rasters kept in the in-memory LRU in front of the disk cache.
    pub memory_entries: usize,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: 180,
            cache_enabled: true,
            cache_dir: None,
            batch_size: 20,
            tick_ms: 50,
            corner_radius: 8,
            memory_entries: 512,
        }
    }
}

impl ThumbnailConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(ThumbnailDiskCache::default_cache_dir)
    }
}

/// Reported after every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationProgress {
    /// Requests rendered since the generator started.
    pub completed: usize,
    /// Requests still queued.
    pub remaining: usize,
}

/// Something that renders thumbnails on request. The viewport talks to the
/// generator through this.
pub trait ThumbnailSink: Send + Sync {
    /// Queues `paths` at `size`; returns how many were newly accepted. A
    /// rejected request queues nothing and yields no events.
    fn request_thumbnails(&self, paths: &[PathBuf], size: u32) -> Result<usize, GeneratorError>;
    /// Drops everything not yet being rendered.
    fn cancel_pending(&self);
}

struct Shared {
    queue: Mutex<PendingQueue>,
    pipeline: ThumbnailPipeline,
    shutdown: AtomicBool,
    batch_size: usize,
}

pub struct ThumbnailGenerator {
    shared: Arc<Shared>,
    events_rx: Receiver<ThumbnailEvent>,
    progress_rx: Receiver<GenerationProgress>,
    wake_tx: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThumbnailGenerator {
    pub fn new(config: &ThumbnailConfig, formats: MediaFormats) -> Result<Self, GeneratorError> {
        Self::with_codec(config, formats, Arc::new(ImageCodec))
    }

    pub fn with_codec(
        config: &ThumbnailConfig,
        formats: MediaFormats,
        codec: Arc<dyn MediaCodec>,
    ) -> Result<Self, GeneratorError> {
        if config.batch_size == 0 {
            return Err(GeneratorError::InvalidBatchSize);
        }

        let cache = if config.cache_enabled {
            open_cache(config)
        } else {
            None
        };
        let pipeline = ThumbnailPipeline::new(codec, cache, formats, config.corner_radius);

        let shared = Arc::new(Shared {
            queue: Mutex::new(PendingQueue::new()),
            pipeline,
            shutdown: AtomicBool::new(false),
            batch_size: config.batch_size,
        });

        let (events_tx, events_rx) = flume::unbounded();
        let (progress_tx, progress_rx) = flume::unbounded();
        let (wake_tx, wake_rx) = flume::unbounded();
        let tick = config.tick();

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("thumb-batcher".into())
            .spawn(move || worker_loop(worker_shared, wake_rx, events_tx, progress_tx, tick))
            .map_err(GeneratorError::Spawn)?;

        debug!(batch_size = config.batch_size, ?tick, "Started thumbnail generator");

        Ok(Self {
            shared,
            events_rx,
            progress_rx,
            wake_tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queues one thumbnail. Returns `false` if the same (path, size) is
    /// already pending or in flight.
    pub fn request_one(&self, path: impl Into<PathBuf>, size: u32) -> Result<bool, GeneratorError> {
        self.check_request(size)?;
        let accepted = self.shared.queue.lock().push(ThumbnailRequest::new(path, size));
        if accepted {
            self.wake();
        }
        Ok(accepted)
    }

    /// Queues many thumbnails at one size. Returns how many were accepted.
    pub fn request_batch<I, P>(&self, paths: I, size: u32) -> Result<usize, GeneratorError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.check_request(size)?;
        let accepted = {
            let mut queue = self.shared.queue.lock();
            paths
                .into_iter()
                .map(|p| queue.push(ThumbnailRequest::new(p, size)))
                .filter(|&pushed| pushed)
                .count()
        };
        if accepted > 0 {
            self.wake();
        }
        trace!(accepted, size, "Queued thumbnail batch");
        Ok(accepted)
    }

    /// Drops every pending request. Batches already being rendered still
    /// deliver their events.
    pub fn cancel_all(&self) -> usize {
        let dropped = self.shared.queue.lock().clear();
        debug!(dropped, "Cancelled pending thumbnail requests");
        dropped
    }

    /// Removes all persisted thumbnails. Returns the number of files removed,
    /// 0 when caching is disabled.
    pub fn clear_cache(&self) -> Result<usize, CacheError> {
        match self.shared.pipeline.cache() {
            Some(cache) => cache.clear(),
            None => Ok(0),
        }
    }

    pub fn cache(&self) -> Option<&ThumbnailDiskCache> {
        self.shared.pipeline.cache()
    }

    /// Receiver for ready/failed events. Clones share one stream.
    pub fn events(&self) -> Receiver<ThumbnailEvent> {
        self.events_rx.clone()
    }

    /// Receiver for per-batch progress. Clones share one stream.
    pub fn progress(&self) -> Receiver<GenerationProgress> {
        self.progress_rx.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// No request is waiting or being rendered.
    pub fn is_idle(&self) -> bool {
        self.shared.queue.lock().is_idle()
    }

    /// Stops the worker after its current batch and waits for it to exit.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down thumbnail generator");
        self.shared.queue.lock().clear();
        self.wake();

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Thumbnail worker panicked");
            }
        }
    }

    fn check_request(&self, size: u32) -> Result<(), GeneratorError> {
        if self.shared.shutdown.load(Ordering::Relaxed) {
            return Err(GeneratorError::Stopped);
        }
        if size == 0 || size > MAX_THUMBNAIL_SIZE {
            return Err(GeneratorError::InvalidSize(size));
        }
        Ok(())
    }

    fn wake(&self) {
        let _ = self.wake_tx.send(());
    }
}

impl Drop for ThumbnailGenerator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ThumbnailSink for ThumbnailGenerator {
    fn request_thumbnails(&self, paths: &[PathBuf], size: u32) -> Result<usize, GeneratorError> {
        self.request_batch(paths.iter().cloned(), size)
    }

    fn cancel_pending(&self) {
        self.cancel_all();
    }
}

fn open_cache(config: &ThumbnailConfig) -> Option<ThumbnailDiskCache> {
    let Some(dir) = config.resolved_cache_dir() else {
        warn!("No cache directory available, thumbnails will not be persisted");
        return None;
    };
    match ThumbnailDiskCache::new(dir, config.memory_entries) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "Failed to open thumbnail cache, continuing without it");
            None
        }
    }
}

fn worker_loop(
    shared: Arc<Shared>,
    wake_rx: Receiver<()>,
    events_tx: Sender<ThumbnailEvent>,
    progress_tx: Sender<GenerationProgress>,
    tick: Duration,
) {
    debug!("Thumbnail worker started");
    let mut completed = 0usize;

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            break;
        }

        match wake_rx.recv_timeout(tick) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        // Collapse a burst of wake-ups into one batch.
        while wake_rx.try_recv().is_ok() {}

        let batch = shared.queue.lock().take_batch(shared.batch_size);
        if batch.is_empty() {
            continue;
        }
        trace!(len = batch.len(), "Processing thumbnail batch");

        for req in batch {
            let event = shared.pipeline.render(&req);
            shared.queue.lock().complete(&req);
            if events_tx.send(event).is_err() {
                trace!("No thumbnail event receivers left");
            }
            completed += 1;
        }

        let remaining = shared.queue.lock().len();
        trace!(completed, remaining, "Thumbnail batch done");
        let _ = progress_tx.send(GenerationProgress {
            completed,
            remaining,
        });
    }

    debug!("Thumbnail worker stopped");
}
