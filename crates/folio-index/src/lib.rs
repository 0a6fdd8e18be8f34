//! Spatial index over block bounding boxes for Folio.
//!
//! [`RegionGrid`] buckets rectangles into a uniform grid so rubber-band
//! selection can ask "which blocks intersect this rectangle" without
//! scanning every block. It knows nothing about the block tree: callers feed
//! it layout rectangles as they change and prune it when blocks go away.
//!
//! Rectangles are closed: boxes that only share an edge intersect, and a
//! zero-sized query works as a point hit-test.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use folio_types::BlockId;

/// Default cell edge length, in layout pixels.
pub const DEFAULT_CELL_SIZE: f64 = 300.0;

/// Blocks covering more cells than this are kept out of the buckets and
/// checked on every query instead.
pub const MAX_CELLS_PER_BLOCK: i64 = 4096;

// ============================================================================
// Geometry
// ============================================================================

/// Axis-aligned rectangle in layout coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Finite coordinates and non-negative size.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Closed AABB overlap test.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }
}

/// Grid cell coordinates. Renders as `"i,j"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub i: i64,
    pub j: i64,
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.i, self.j)
    }
}

/// Outcome of [`RegionGrid::sync_layout`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayoutSync {
    /// Blocks whose rectangle was (re)indexed.
    pub updated: usize,
    /// Blocks whose rectangle had not moved.
    pub unchanged: usize,
    /// Blocks dropped because a new version no longer lays them out.
    pub removed: usize,
}

// ============================================================================
// RegionGrid
// ============================================================================

/// Uniform grid mapping cells to the blocks overlapping them.
///
/// Each block remembers the cells it occupies so an update only touches
/// those buckets. Oversized blocks (see [`MAX_CELLS_PER_BLOCK`]) occupy no
/// cells.
#[derive(Debug, Clone)]
pub struct RegionGrid<K = BlockId> {
    cell_size: f64,
    cells: HashMap<CellKey, HashSet<K>>,
    rects: HashMap<K, Rect>,
    occupied: HashMap<K, Vec<CellKey>>,
    oversized: HashSet<K>,
    /// Data version of the last full layout pass.
    version: Option<u64>,
}

impl<K> Default for RegionGrid<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl<K> RegionGrid<K>
where
    K: Hash + Eq + Clone,
{
    /// Create a grid. Non-positive or non-finite sizes fall back to the default.
    pub fn new(cell_size: f64) -> Self {
        let cell_size = if cell_size.is_finite() && cell_size > 0.0 {
            cell_size
        } else {
            warn!(cell_size, "Invalid region cell size, using {}", DEFAULT_CELL_SIZE);
            DEFAULT_CELL_SIZE
        };
        Self {
            cell_size,
            cells: HashMap::new(),
            rects: HashMap::new(),
            occupied: HashMap::new(),
            oversized: HashSet::new(),
            version: None,
        }
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn version(&self) -> Option<u64> {
        self.version
    }

    pub fn rect_of(&self, id: &K) -> Option<&Rect> {
        self.rects.get(id)
    }

    /// Cells a block currently occupies.
    pub fn cells_of(&self, id: &K) -> &[CellKey] {
        self.occupied.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index (or re-index) a block's rectangle.
    ///
    /// An invalid rectangle removes the block instead.
    pub fn update_block(&mut self, id: K, rect: Rect) {
        self.remove_block(&id);
        if !rect.is_valid() {
            warn!(?rect, "Ignoring invalid block rectangle");
            return;
        }

        if self.span(&rect) > MAX_CELLS_PER_BLOCK {
            trace!(?rect, "update_block: oversized");
            self.oversized.insert(id.clone());
            self.occupied.insert(id.clone(), Vec::new());
            self.rects.insert(id, rect);
            return;
        }

        let keys: Vec<CellKey> = self.cells_covering(&rect).collect();
        for key in &keys {
            self.cells.entry(*key).or_default().insert(id.clone());
        }
        trace!(cells = keys.len(), "update_block");
        self.occupied.insert(id.clone(), keys);
        self.rects.insert(id, rect);
    }

    /// Drop a block from the index. Returns whether it was present.
    pub fn remove_block(&mut self, id: &K) -> bool {
        let Some(keys) = self.occupied.remove(id) else {
            return false;
        };
        for key in keys {
            if let Some(bucket) = self.cells.get_mut(&key) {
                bucket.remove(id);
                if bucket.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
        self.oversized.remove(id);
        self.rects.remove(id);
        true
    }

    /// Keep only the blocks `keep` accepts. Returns how many were dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let doomed: Vec<K> = self.rects.keys().filter(|id| !keep(id)).cloned().collect();
        for id in &doomed {
            self.remove_block(id);
        }
        doomed.len()
    }

    /// Blocks whose rectangle intersects `rect`, each reported once.
    pub fn get_intersecting_blocks(&self, rect: &Rect) -> Vec<K> {
        if !rect.is_valid() || self.rects.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for id in &self.oversized {
            if self.rects.get(id).is_some_and(|r| r.intersects(rect)) && seen.insert(id.clone()) {
                hits.push(id.clone());
            }
        }

        let mut visit = |bucket: &HashSet<K>| {
            for id in bucket {
                let overlaps = self.rects.get(id).is_some_and(|r| r.intersects(rect));
                if overlaps && seen.insert(id.clone()) {
                    hits.push(id.clone());
                }
            }
        };

        let (lo, hi) = (self.cell_of(rect.x, rect.y), self.cell_of(rect.right(), rect.bottom()));
        if self.span(rect) > self.cells.len() as i64 {
            // Query covers more cells than are occupied; walk the occupied ones.
            for (key, bucket) in &self.cells {
                if (lo.i..=hi.i).contains(&key.i) && (lo.j..=hi.j).contains(&key.j) {
                    visit(bucket);
                }
            }
        } else {
            for key in self.cells_covering(rect) {
                if let Some(bucket) = self.cells.get(&key) {
                    visit(bucket);
                }
            }
        }
        hits
    }

    /// Incrementally refresh from a layout pass.
    ///
    /// Rectangles that did not move are skipped. When `version` differs from
    /// the previous pass, the layout is taken as complete and blocks missing
    /// from it are dropped; a repeat of the same version (a scroll) only
    /// adds and updates.
    pub fn sync_layout<I>(&mut self, version: u64, layouts: I) -> LayoutSync
    where
        I: IntoIterator<Item = (K, Rect)>,
    {
        let mut stats = LayoutSync::default();
        let full_pass = self.version != Some(version);
        let mut present = HashSet::new();

        for (id, rect) in layouts {
            if full_pass {
                present.insert(id.clone());
            }
            if self.rects.get(&id) == Some(&rect) {
                stats.unchanged += 1;
            } else {
                self.update_block(id, rect);
                stats.updated += 1;
            }
        }

        if full_pass {
            let stale: Vec<K> = self
                .rects
                .keys()
                .filter(|id| !present.contains(*id))
                .cloned()
                .collect();
            for id in stale {
                self.remove_block(&id);
                stats.removed += 1;
            }
            self.version = Some(version);
        }
        trace!(version, ?stats, "sync_layout");
        stats
    }

    /// Forget every block.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.rects.clear();
        self.occupied.clear();
        self.oversized.clear();
        self.version = None;
    }

    // ========================================================================
    // Cell math
    // ========================================================================

    fn cell_of(&self, x: f64, y: f64) -> CellKey {
        CellKey {
            i: (x / self.cell_size).floor() as i64,
            j: (y / self.cell_size).floor() as i64,
        }
    }

    /// Number of cells `rect` covers, saturating.
    fn span(&self, rect: &Rect) -> i64 {
        let (lo, hi) = (self.cell_of(rect.x, rect.y), self.cell_of(rect.right(), rect.bottom()));
        let width = hi.i.saturating_sub(lo.i).saturating_add(1);
        let height = hi.j.saturating_sub(lo.j).saturating_add(1);
        width.saturating_mul(height)
    }

    fn cells_covering(&self, rect: &Rect) -> impl Iterator<Item = CellKey> + use<K> {
        let lo = self.cell_of(rect.x, rect.y);
        let hi = self.cell_of(rect.right(), rect.bottom());
        (lo.i..=hi.i).flat_map(move |i| (lo.j..=hi.j).map(move |j| CellKey { i, j }))
    }
}
