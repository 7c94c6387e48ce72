//! Background media scanner.
//!
//! A scan walks the tree twice. The counting pass totals every regular file
//! in non-skipped directories, the extraction pass visits the same files in
//! the same order, builds a [`MediaItem`] for each recognized one and adds
//! it to the shared [`PhotoIndex`]. Progress is reported after every file so
//! `current` reaches `total` exactly.
//!
//! Cancellation is cooperative: the token is polled before each walk step.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{ExtractionError, ScanError};
use crate::models::{format_tag, MediaFormats, MediaItem, MediaKind, PhotoIndex};
use crate::scanner::hash::content_hash;
use crate::scanner::metadata::MetadataExtractor;

/// Configuration for the file scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Recognized image and video extensions.
    pub formats: MediaFormats,
    /// Skip directories whose name starts with a dot.
    pub skip_hidden_dirs: bool,
    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
    /// Compute content hashes for duplicate detection.
    pub compute_hashes: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            formats: MediaFormats::default(),
            skip_hidden_dirs: true,
            follow_symlinks: false,
            compute_hashes: true,
        }
    }
}

/// Events emitted during a scan, in order.
///
/// Exactly one of `Finished`, `Cancelled` or `Failed` ends every run.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Started { root: PathBuf },
    Progress { current: usize, total: usize },
    ItemFound(Arc<MediaItem>),
    /// A single file could not be indexed. The scan continues.
    FileError { path: PathBuf, message: String },
    Finished { count: usize },
    Cancelled,
    /// The scan could not continue, e.g. the root disappeared.
    Failed { path: PathBuf, message: String },
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanEvent::Finished { .. } | ScanEvent::Cancelled | ScanEvent::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Counting,
    Extracting,
    Finished,
    Cancelled,
    Failed,
}

impl ScanState {
    pub fn is_running(self) -> bool {
        matches!(self, ScanState::Counting | ScanState::Extracting)
    }
}

/// Everything a running scan needs, detached from the owning scanner so it
/// can move onto the worker thread.
#[derive(Clone)]
struct ScanRun {
    config: ScanConfig,
    index: Arc<PhotoIndex>,
    state: Arc<Mutex<ScanState>>,
}

/// How a pass ended early.
enum Interrupted {
    Cancelled,
    Failed { path: PathBuf, message: String },
}

impl ScanRun {
    fn execute(
        &self,
        root: &Path,
        token: &CancellationToken,
        emit: &mut dyn FnMut(ScanEvent),
    ) -> ScanState {
        info!("Starting scan of {:?}", root);
        self.index.clear();
        emit(ScanEvent::Started {
            root: root.to_path_buf(),
        });

        let outcome = match self.count_files(root, token) {
            Ok(total) => {
                self.set_state(ScanState::Extracting);
                self.extract_files(root, total, token, emit)
            }
            Err(e) => Err(e),
        };

        let (state, event) = match outcome {
            Ok(count) => {
                info!(count, "Scan complete");
                (ScanState::Finished, ScanEvent::Finished { count })
            }
            Err(Interrupted::Cancelled) => {
                info!(indexed = self.index.count(), "Scan cancelled");
                (ScanState::Cancelled, ScanEvent::Cancelled)
            }
            Err(Interrupted::Failed { path, message }) => {
                warn!(?path, %message, "Scan failed");
                (ScanState::Failed, ScanEvent::Failed { path, message })
            }
        };

        // State must already be terminal when the last event is observed.
        self.set_state(state);
        emit(event);
        state
    }

    fn set_state(&self, state: ScanState) {
        *self.state.lock() = state;
    }

    fn walker(&self, root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
        let skip_hidden = self.config.skip_hidden_dirs;
        WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !(skip_hidden && is_hidden_dir(entry)))
    }

    fn count_files(&self, root: &Path, token: &CancellationToken) -> Result<usize, Interrupted> {
        let mut total = 0;
        for entry in self.walker(root) {
            if token.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }
            match entry {
                Ok(entry) if !entry.file_type().is_dir() => total += 1,
                Ok(_) => {}
                Err(e) => check_walk_error(root, &e)?,
            }
        }
        debug!(total, "Counted files");
        Ok(total)
    }

    fn extract_files(
        &self,
        root: &Path,
        mut total: usize,
        token: &CancellationToken,
        emit: &mut dyn FnMut(ScanEvent),
    ) -> Result<usize, Interrupted> {
        let mut current = 0;
        let mut found = 0;

        for entry in self.walker(root) {
            if token.is_cancelled() {
                return Err(Interrupted::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    check_walk_error(root, &e)?;
                    let path = e.path().unwrap_or(root).to_path_buf();
                    emit(ScanEvent::FileError {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            current += 1;
            let path = entry.path();
            if let Some(kind) = self.config.formats.classify(path) {
                match self.build_item(path, kind) {
                    Ok(item) => {
                        let item = Arc::new(item);
                        self.index.add(Arc::clone(&item));
                        found += 1;
                        emit(ScanEvent::ItemFound(item));
                    }
                    Err(e) => {
                        warn!(?path, error = %e, "Failed to index file");
                        emit(ScanEvent::FileError {
                            path: path.to_path_buf(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            // Files created between the passes push the total up rather than
            // letting current overtake it.
            total = total.max(current);
            emit(ScanEvent::Progress { current, total });
        }

        if current < total {
            // Files removed between the passes.
            emit(ScanEvent::Progress {
                current,
                total: current,
            });
        }

        Ok(found)
    }

    fn build_item(&self, path: &Path, kind: MediaKind) -> Result<MediaItem, ExtractionError> {
        trace!(?path, ?kind, "Extracting metadata");
        let meta = MetadataExtractor::extract(path, kind)?;

        let hash = self.config.compute_hashes.then(|| {
            content_hash(path).unwrap_or_else(|e| {
                debug!(?path, error = %e, "Hashing failed");
                String::new()
            })
        });

        let created = meta.effective_created();
        let metadata = meta
            .exif
            .map(|exif| exif.tags)
            .filter(|tags| !tags.is_empty());

        Ok(MediaItem {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind,
            size: meta.size,
            created,
            modified: meta.modified,
            width: meta.width,
            height: meta.height,
            format: format_tag(path),
            folder: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            metadata,
            hash,
        })
    }
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_string_lossy().starts_with('.')
}

/// A walk error is fatal only when the root itself is gone.
fn check_walk_error(root: &Path, err: &walkdir::Error) -> Result<(), Interrupted> {
    if root.exists() {
        debug!(path = ?err.path(), error = %err, "Walk error");
        Ok(())
    } else {
        Err(Interrupted::Failed {
            path: root.to_path_buf(),
            message: format!("scan root disappeared: {}", err),
        })
    }
}

/// Scans directory trees into a shared [`PhotoIndex`].
///
/// Only one scan runs at a time per scanner.
pub struct FileScanner {
    config: ScanConfig,
    index: Arc<PhotoIndex>,
    state: Arc<Mutex<ScanState>>,
    cancel: Mutex<Option<CancellationToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FileScanner {
    pub fn new(index: Arc<PhotoIndex>) -> Self {
        Self::with_config(ScanConfig::default(), index)
    }

    pub fn with_config(config: ScanConfig, index: Arc<PhotoIndex>) -> Self {
        let config = ScanConfig {
            formats: config.formats.normalized(),
            ..config
        };
        Self {
            config,
            index,
            state: Arc::new(Mutex::new(ScanState::Idle)),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<PhotoIndex> {
        &self.index
    }

    pub fn state(&self) -> ScanState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Starts a scan of `root` on a background thread, sending events to
    /// `events`. The returned token cancels this run.
    pub fn start(
        &self,
        root: impl Into<PathBuf>,
        events: flume::Sender<ScanEvent>,
    ) -> Result<CancellationToken, ScanError> {
        let root = root.into();
        validate_root(&root)?;
        self.begin()?;

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let run = self.run_context();
        let worker_token = token.clone();
        let spawned = thread::Builder::new()
            .name("scanner".into())
            .spawn(move || {
                run.execute(&root, &worker_token, &mut |event| {
                    // A dropped receiver only means nobody is listening.
                    let _ = events.send(event);
                });
            });

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(token)
            }
            Err(e) => {
                *self.state.lock() = ScanState::Idle;
                Err(ScanError::Spawn(e))
            }
        }
    }

    /// Runs a scan on the calling thread, passing each event to `emit`.
    ///
    /// Returns the terminal state.
    pub fn scan_blocking(
        &self,
        root: &Path,
        token: &CancellationToken,
        mut emit: impl FnMut(ScanEvent),
    ) -> Result<ScanState, ScanError> {
        validate_root(root)?;
        self.begin()?;
        *self.cancel.lock() = Some(token.clone());
        Ok(self.run_context().execute(root, token, &mut emit))
    }

    /// Requests cancellation of the running scan. No-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel.lock().as_ref() {
            debug!("Cancelling scan");
            token.cancel();
        }
    }

    /// Blocks until the background scan thread, if any, has exited.
    pub fn wait(&self) -> ScanState {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Scanner thread panicked");
                *self.state.lock() = ScanState::Failed;
            }
        }
        self.state()
    }

    fn begin(&self) -> Result<(), ScanError> {
        {
            let mut state = self.state.lock();
            if state.is_running() {
                return Err(ScanError::AlreadyRunning);
            }
            *state = ScanState::Counting;
        }

        // A finished run may still be sending its terminal event; it must
        // land before this run's `Started`.
        let previous = self.worker.lock().take();
        if let Some(handle) = previous {
            if handle.join().is_err() {
                warn!("Previous scanner thread panicked");
            }
        }
        Ok(())
    }

    fn run_context(&self) -> ScanRun {
        ScanRun {
            config: self.config.clone(),
            index: Arc::clone(&self.index),
            state: Arc::clone(&self.state),
        }
    }
}

fn validate_root(root: &Path) -> Result<(), ScanError> {
    if root.as_os_str().is_empty() || !root.exists() {
        return Err(ScanError::InvalidRoot(root.to_path_buf()));
    }
    Ok(())
}
