//! Virtual windowing over a thumbnail grid.
//!
//! The grid is laid out in fixed-size cells, so the visible index range
//! follows directly from the scroll offset. Only thumbnails for that range
//! (plus whatever survived earlier scrolling) are kept materialized, and
//! never more than `max_active_thumbnails` of them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::models::MediaItem;
use crate::thumbnails::{ThumbnailEvent, ThumbnailSink, MAX_THUMBNAIL_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Ceiling on materialized thumbnails.
    pub max_active_thumbnails: usize,
    /// Extra pixels above and below the viewport treated as visible.
    pub prefetch_margin_px: u32,
    /// Rows on each side of the visible range protected from early eviction.
    pub buffer_rows: usize,
    /// Range changes smaller than this many rows on both ends are ignored.
    pub suppress_rows: usize,
    /// Horizontal space not available to cells.
    pub content_margin: u32,
    /// Space around each thumbnail within its cell.
    pub item_padding: u32,
    /// Height reserved under each thumbnail for its caption.
    pub label_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_active_thumbnails: 200,
            prefetch_margin_px: 100,
            buffer_rows: 3,
            suppress_rows: 2,
            content_margin: 24,
            item_padding: 14,
            label_height: 40,
        }
    }
}

/// Inclusive range of item indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
}

impl VisibleRange {
    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }

    fn distance(&self, index: usize) -> usize {
        if index < self.start {
            self.start - index
        } else {
            index.saturating_sub(self.end)
        }
    }
}

/// A thumbnail slot held by the window.
#[derive(Debug, Clone)]
pub struct MaterializedThumbnail {
    pub index: usize,
    pub path: PathBuf,
    /// `None` until the generator delivers.
    pub image: Option<Arc<RgbaImage>>,
    pub failed: bool,
}

/// What a window operation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowUpdate {
    pub requested: Vec<PathBuf>,
    pub evicted: Vec<PathBuf>,
    /// The change was too small to act on.
    pub suppressed: bool,
}

pub struct ViewportWindow {
    config: WindowConfig,
    sink: Arc<dyn ThumbnailSink>,
    items: Vec<Arc<MediaItem>>,
    thumbnail_size: u32,
    viewport_width: u32,
    viewport_height: u32,
    scroll_offset: f64,
    columns: usize,
    visible: Option<VisibleRange>,
    materialized: HashMap<PathBuf, MaterializedThumbnail>,
}

impl ViewportWindow {
    pub fn new(config: WindowConfig, sink: Arc<dyn ThumbnailSink>, thumbnail_size: u32) -> Self {
        let mut window = Self {
            config,
            sink,
            items: Vec::new(),
            thumbnail_size: thumbnail_size.clamp(1, MAX_THUMBNAIL_SIZE),
            viewport_width: 0,
            viewport_height: 0,
            scroll_offset: 0.0,
            columns: 1,
            visible: None,
            materialized: HashMap::new(),
        };
        window.columns = window.compute_columns();
        window
    }

    /// Replaces the item list, e.g. with a fresh `PhotoIndex::all_sorted()`.
    pub fn set_items(&mut self, items: Vec<Arc<MediaItem>>) -> WindowUpdate {
        debug!(count = items.len(), "Window items replaced");
        self.items = items;
        self.sink.cancel_pending();
        self.rebuild()
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) -> WindowUpdate {
        self.viewport_width = width;
        self.viewport_height = height;

        let columns = self.compute_columns();
        if columns != self.columns {
            debug!(from = self.columns, to = columns, "Column count changed");
            self.columns = columns;
            return self.rebuild();
        }
        self.refresh(false)
    }

    pub fn set_scroll_offset(&mut self, offset: f64) -> WindowUpdate {
        self.scroll_offset = offset.max(0.0);
        self.refresh(false)
    }

    /// Changes the thumbnail size, dropping every materialized thumbnail.
    ///
    /// The size is clamped to `1..=MAX_THUMBNAIL_SIZE`; [`Self::thumbnail_size`]
    /// reports the one in effect.
    pub fn set_thumbnail_size(&mut self, size: u32) -> WindowUpdate {
        let size = size.clamp(1, MAX_THUMBNAIL_SIZE);
        if size == self.thumbnail_size {
            return WindowUpdate::default();
        }
        debug!(from = self.thumbnail_size, to = size, "Thumbnail size changed");
        self.thumbnail_size = size;
        self.columns = self.compute_columns();
        self.sink.cancel_pending();
        self.rebuild()
    }

    pub fn set_max_active(&mut self, max: usize) -> WindowUpdate {
        self.config.max_active_thumbnails = max.max(1);
        WindowUpdate {
            evicted: self.evict_over_ceiling(),
            ..Default::default()
        }
    }

    /// Attaches a generated raster to its slot. Events for slots that were
    /// evicted, or rendered at a stale size, are ignored.
    pub fn on_thumbnail_event(&mut self, event: &ThumbnailEvent) -> bool {
        if event.size() != self.thumbnail_size {
            return false;
        }
        match self.materialized.get_mut(event.path()) {
            Some(slot) => {
                slot.image = Some(Arc::clone(event.image()));
                slot.failed = event.is_failure();
                true
            }
            None => {
                trace!(path = ?event.path(), "Dropping thumbnail for evicted slot");
                false
            }
        }
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn row_height(&self) -> u32 {
        self.thumbnail_size + self.config.label_height
    }

    pub fn thumbnail_size(&self) -> u32 {
        self.thumbnail_size
    }

    pub fn max_active(&self) -> usize {
        self.config.max_active_thumbnails
    }

    pub fn content_height(&self) -> u64 {
        self.row_count() as u64 * u64::from(self.row_height())
    }

    pub fn visible_range(&self) -> Option<VisibleRange> {
        self.visible
    }

    pub fn materialized_count(&self) -> usize {
        self.materialized.len()
    }

    pub fn materialized(&self, path: &Path) -> Option<&MaterializedThumbnail> {
        self.materialized.get(path)
    }

    pub fn is_materialized(&self, path: &Path) -> bool {
        self.materialized.contains_key(path)
    }

    fn row_count(&self) -> usize {
        self.items.len().div_ceil(self.columns)
    }

    fn compute_columns(&self) -> usize {
        let footprint = self.thumbnail_size + self.config.item_padding;
        let usable = self.viewport_width.saturating_sub(self.config.content_margin);
        ((usable / footprint.max(1)) as usize).max(1)
    }

    fn compute_range(&self) -> Option<VisibleRange> {
        if self.items.is_empty() {
            return None;
        }
        let row_height = f64::from(self.row_height());
        let margin = f64::from(self.config.prefetch_margin_px);
        let last_row_index = self.row_count() - 1;

        let top = (self.scroll_offset - margin).max(0.0);
        let bottom = self.scroll_offset + f64::from(self.viewport_height) + margin;
        let last_row = ((bottom / row_height).floor() as usize).min(last_row_index);
        let first_row = ((top / row_height).floor() as usize).min(last_row);

        Some(VisibleRange {
            start: first_row * self.columns,
            end: ((last_row + 1) * self.columns - 1).min(self.items.len() - 1),
        })
    }

    fn is_small_change(&self, previous: VisibleRange, next: VisibleRange) -> bool {
        let threshold = self.columns * self.config.suppress_rows;
        previous.start.abs_diff(next.start) < threshold && previous.end.abs_diff(next.end) < threshold
    }

    fn rebuild(&mut self) -> WindowUpdate {
        let evicted: Vec<PathBuf> = self.materialized.drain().map(|(path, _)| path).collect();
        self.visible = None;
        let mut update = self.refresh(true);
        update.evicted.extend(evicted);
        update
    }

    fn refresh(&mut self, force: bool) -> WindowUpdate {
        let Some(range) = self.compute_range() else {
            self.visible = None;
            return WindowUpdate::default();
        };

        if !force {
            if let Some(previous) = self.visible {
                if self.is_small_change(previous, range) {
                    return WindowUpdate {
                        suppressed: true,
                        ..Default::default()
                    };
                }
            }
        }
        self.visible = Some(range);

        let mut requested = Vec::new();
        for index in range.start..=range.end {
            let path = &self.items[index].path;
            if self.materialized.contains_key(path) {
                continue;
            }
            self.materialized.insert(
                path.clone(),
                MaterializedThumbnail {
                    index,
                    path: path.clone(),
                    image: None,
                    failed: false,
                },
            );
            requested.push(path.clone());
        }

        let evicted = self.evict_over_ceiling();
        // Slots evicted straight away are not worth rendering.
        requested.retain(|path| self.materialized.contains_key(path));
        if !requested.is_empty() {
            if let Err(e) = self.sink.request_thumbnails(&requested, self.thumbnail_size) {
                // No event will ever fill these slots.
                warn!(error = %e, count = requested.len(), "Thumbnail request rejected");
                for path in requested.drain(..) {
                    self.materialized.remove(&path);
                }
            }
        }

        trace!(
            start = range.start,
            end = range.end,
            requested = requested.len(),
            evicted = evicted.len(),
            active = self.materialized.len(),
            "Window refreshed"
        );
        WindowUpdate {
            requested,
            evicted,
            suppressed: false,
        }
    }

    /// Evicts slots until the ceiling holds: first those outside the
    /// buffered range, then buffered but not visible, then visible ones from
    /// the end. Farthest from the visible range goes first within each tier.
    fn evict_over_ceiling(&mut self) -> Vec<PathBuf> {
        let max = self.config.max_active_thumbnails.max(1);
        if self.materialized.len() <= max {
            return Vec::new();
        }
        let excess = self.materialized.len() - max;

        let buffer = self.columns * self.config.buffer_rows;
        let rank = |slot: &MaterializedThumbnail| -> (u8, usize) {
            let Some(visible) = self.visible else {
                return (0, slot.index);
            };
            if visible.contains(slot.index) {
                (2, slot.index)
            } else if slot.index + buffer < visible.start || slot.index > visible.end + buffer {
                (0, visible.distance(slot.index))
            } else {
                (1, visible.distance(slot.index))
            }
        };

        let mut candidates: Vec<((u8, usize), PathBuf)> = self
            .materialized
            .values()
            .map(|slot| (rank(slot), slot.path.clone()))
            .collect();
        candidates.sort_by(|(a, _), (b, _)| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let evicted: Vec<PathBuf> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, path)| path)
            .collect();
        for path in &evicted {
            self.materialized.remove(path);
        }
        debug!(count = evicted.len(), active = self.materialized.len(), "Evicted thumbnails");
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeneratorError;
    use crate::models::MediaKind;
    use crate::thumbnails::Thumbnail;
    use crate::thumbnails::ThumbnailSource;
    use chrono::NaiveDateTime;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<(PathBuf, u32)>>,
        cancels: Mutex<usize>,
        stopped: Mutex<bool>,
    }

    impl ThumbnailSink for RecordingSink {
        fn request_thumbnails(&self, paths: &[PathBuf], size: u32) -> Result<usize, GeneratorError> {
            if *self.stopped.lock() {
                return Err(GeneratorError::Stopped);
            }
            self.requests
                .lock()
                .extend(paths.iter().map(|p| (p.clone(), size)));
            Ok(paths.len())
        }

        fn cancel_pending(&self) {
            *self.cancels.lock() += 1;
        }
    }

    fn items(n: usize) -> Vec<Arc<MediaItem>> {
        (0..n)
            .map(|i| {
                let path = PathBuf::from(format!("/photos/{:04}.jpg", i));
                Arc::new(MediaItem {
                    name: format!("{:04}.jpg", i),
                    folder: PathBuf::from("/photos"),
                    path,
                    kind: MediaKind::Image,
                    size: 1,
                    created: NaiveDateTime::default(),
                    modified: NaiveDateTime::default(),
                    width: 0,
                    height: 0,
                    format: "JPG".into(),
                    metadata: None,
                    hash: None,
                })
            })
            .collect()
    }

    fn path(i: usize) -> PathBuf {
        PathBuf::from(format!("/photos/{:04}.jpg", i))
    }

    fn window(n: usize, max: usize) -> (ViewportWindow, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let config = WindowConfig {
            max_active_thumbnails: max,
            ..Default::default()
        };
        let mut window = ViewportWindow::new(config, Arc::clone(&sink) as Arc<dyn ThumbnailSink>, 180);
        window.set_viewport(1000, 600);
        window.set_items(items(n));
        (window, sink)
    }

    fn ready(p: PathBuf, size: u32) -> ThumbnailEvent {
        ThumbnailEvent::Ready(Thumbnail {
            path: p,
            size,
            image: Arc::new(RgbaImage::new(1, 1)),
            source: ThumbnailSource::Decoded,
        })
    }

    #[test]
    fn test_layout_math() {
        let (window, _) = window(100, 200);
        // (1000 - 24) / (180 + 14)
        assert_eq!(window.columns(), 5);
        assert_eq!(window.row_height(), 220);
        assert_eq!(window.content_height(), 20 * 220);
    }

    #[test]
    fn test_initial_range_requested() {
        let (window, sink) = window(100, 200);
        // Rows 0..=3: (0 + 600 + 100) / 220 = 3.
        assert_eq!(window.visible_range(), Some(VisibleRange { start: 0, end: 19 }));
        assert_eq!(window.materialized_count(), 20);
        let requests = sink.requests.lock();
        assert_eq!(requests.len(), 20);
        assert!(requests.iter().all(|(_, size)| *size == 180));
        // Buffer rows only protect from eviction; they are not prefetched.
        assert!(!window.is_materialized(&path(20)));
        assert!(requests.iter().all(|(p, _)| p != &path(20)));
    }

    #[test]
    fn test_small_scroll_is_suppressed() {
        let (mut window, sink) = window(100, 200);
        let update = window.set_scroll_offset(30.0);
        assert!(update.suppressed);
        assert_eq!(sink.requests.lock().len(), 20);

        let update = window.set_scroll_offset(1100.0);
        assert!(!update.suppressed);
        assert!(!update.requested.is_empty());
    }

    #[test]
    fn test_range_clamped_at_end() {
        let (mut window, _) = window(23, 200);
        window.set_scroll_offset(10_000.0);
        assert_eq!(window.visible_range().map(|r| r.end), Some(22));
    }

    #[test]
    fn test_eviction_prefers_far_outside_buffer() {
        let (mut window, _) = window(200, 40);
        let update = window.set_scroll_offset(2200.0);

        // Rows 9..=13 are visible: items 45..=69.
        assert_eq!(window.visible_range(), Some(VisibleRange { start: 45, end: 69 }));
        assert_eq!(window.materialized_count(), 40);
        assert_eq!(update.evicted.len(), 5);
        for i in 0..5 {
            assert!(!window.is_materialized(&path(i)));
        }
        assert!(window.is_materialized(&path(5)));
        assert!((45..=69).all(|i| window.is_materialized(&path(i))));
    }

    #[test]
    fn test_eviction_waits_for_ceiling() {
        let (mut window, _) = window(200, 100);
        let update = window.set_scroll_offset(2200.0);
        assert!(update.evicted.is_empty());
        assert_eq!(window.materialized_count(), 45);
    }

    #[test]
    fn test_visible_range_larger_than_ceiling() {
        let (window, sink) = window(100, 8);
        assert_eq!(window.materialized_count(), 8);
        assert!(window.is_materialized(&path(0)));
        assert!(!window.is_materialized(&path(19)));
        assert_eq!(sink.requests.lock().len(), 8);
    }

    #[test]
    fn test_thumbnail_size_change_rebuilds() {
        let (mut window, sink) = window(100, 200);
        let cancels_before = *sink.cancels.lock();

        let update = window.set_thumbnail_size(96);
        assert_eq!(*sink.cancels.lock(), cancels_before + 1);
        assert_eq!(update.evicted.len(), 20);
        // (1000 - 24) / (96 + 14)
        assert_eq!(window.columns(), 8);
        assert!(sink.requests.lock().iter().any(|(_, size)| *size == 96));
        assert!(window.materialized_count() > 0);
    }

    #[test]
    fn test_thumbnail_size_clamped_to_generator_limit() {
        let (mut window, sink) = window(100, 200);
        let update = window.set_thumbnail_size(5000);

        assert_eq!(window.thumbnail_size(), MAX_THUMBNAIL_SIZE);
        assert!(!update.requested.is_empty());
        let requests = sink.requests.lock();
        assert!(requests.iter().all(|(_, size)| *size <= MAX_THUMBNAIL_SIZE));
        assert!(requests.iter().any(|(_, size)| *size == MAX_THUMBNAIL_SIZE));
    }

    #[test]
    fn test_rejected_request_leaves_no_slots() {
        let (mut window, sink) = window(100, 200);
        *sink.stopped.lock() = true;

        let update = window.set_thumbnail_size(96);
        assert!(update.requested.is_empty());
        assert_eq!(update.evicted.len(), 20);
        assert_eq!(window.materialized_count(), 0);
        assert!(!window.on_thumbnail_event(&ready(path(0), 96)));
    }

    #[test]
    fn test_resize_changing_columns_rebuilds() {
        let (mut window, _) = window(100, 200);
        let update = window.set_viewport(500, 600);
        assert_eq!(window.columns(), 2);
        assert_eq!(update.evicted.len(), 20);
        assert_eq!(window.visible_range(), Some(VisibleRange { start: 0, end: 7 }));
    }

    #[test]
    fn test_lowering_ceiling_evicts() {
        let (mut window, _) = window(100, 200);
        let update = window.set_max_active(5);
        assert_eq!(update.evicted.len(), 15);
        assert_eq!(window.materialized_count(), 5);
        assert!(window.is_materialized(&path(0)));
    }

    #[test]
    fn test_thumbnail_events_attach_or_drop() {
        let (mut window, _) = window(200, 40);
        assert!(window.on_thumbnail_event(&ready(path(0), 180)));
        assert!(window.materialized(&path(0)).unwrap().image.is_some());

        assert!(!window.on_thumbnail_event(&ready(path(0), 96)));
        assert!(!window.on_thumbnail_event(&ready(path(150), 180)));

        window.set_scroll_offset(2200.0);
        assert!(!window.on_thumbnail_event(&ready(path(0), 180)));
    }

    #[test]
    fn test_ceiling_holds_under_random_operations() {
        let (mut window, _) = window(1000, 30);
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        for _ in 0..500 {
            match next(5) {
                0 | 1 => {
                    let max = window.content_height().max(1);
                    window.set_scroll_offset(next(max) as f64);
                }
                2 => {
                    window.set_viewport(100 + next(2000) as u32, 50 + next(1500) as u32);
                }
                3 => {
                    let sizes = [64, 96, 128, 180, 256];
                    window.set_thumbnail_size(sizes[next(5) as usize]);
                }
                _ => {
                    window.set_max_active(1 + next(60) as usize);
                }
            }
            assert!(window.materialized_count() <= window.max_active());
        }
    }
}
