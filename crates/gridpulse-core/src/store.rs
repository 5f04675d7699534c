//! Versioned, copy-on-write snapshot storage.
//!
//! Every table (and table view) owns exactly one [`SnapshotCell`]: an
//! atomically swappable reference to an immutable state value. Mutations
//! never touch a state in place; they build a successor and install it
//! through an optimistic compare-and-swap retry loop. Readers take one
//! `load()` and get a consistent snapshot for free.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use gridpulse_common::{CellValue, ColumnHeader, GridError};
use rustc_hash::FxHashMap;

/// A state value that carries the monotonic version counter.
pub(crate) trait Versioned: Clone {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

/// The single shared mutable point per table/view: an `ArcSwap` over the
/// immutable state, updated via CAS with retry.
pub(crate) struct SnapshotCell<T> {
    inner: ArcSwap<T>,
}

impl<T: Versioned> SnapshotCell<T> {
    pub(crate) fn new(initial: T) -> Self {
        SnapshotCell {
            inner: ArcSwap::from_pointee(initial),
        }
    }

    /// One consistent snapshot.
    pub(crate) fn load(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Atomically applies `f` to the current state and installs the result.
    ///
    /// `f` must be pure aside from building the successor state: under
    /// contention it runs again against the fresh value. Returning
    /// `Ok(None)` signals a no-op; the state (and its version) is left
    /// untouched. On success the version has been bumped by exactly one
    /// and `(prev, next)` is returned.
    pub(crate) fn update<F>(&self, f: F) -> Result<Option<(Arc<T>, Arc<T>)>, GridError>
    where
        F: Fn(&T) -> Result<Option<T>, GridError>,
    {
        let mut cur = self.inner.load_full();
        loop {
            let next = match f(&cur)? {
                None => return Ok(None),
                Some(mut next) => {
                    next.set_version(cur.version() + 1);
                    Arc::new(next)
                }
            };
            let prev = self.inner.compare_and_swap(&cur, Arc::clone(&next));
            if Arc::ptr_eq(&prev, &cur) {
                return Ok(Some((cur, next)));
            }
            // Another writer won the race; retry against its result.
            cur = Arc::clone(&prev);
        }
    }
}

/// Identity and placement of one column inside a [`TableState`].
///
/// `id` is stable across renames; `order` fixes the left-to-right position
/// used by ranges and iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ColumnMeta {
    pub id: u64,
    pub order: u64,
}

/// Immutable snapshot of all table data.
///
/// Cell storage is keyed by column id, so renames only rewrite the header
/// map. The per-column maps are behind `Arc`s: a successor state clones the
/// outer map and only deep-copies the one column it mutates.
#[derive(Debug, Clone)]
pub(crate) struct TableState {
    pub name: Arc<str>,
    pub columns: BTreeMap<ColumnHeader, ColumnMeta>,
    pub cells: FxHashMap<u64, Arc<BTreeMap<i64, CellValue>>>,
    pub next_column: u64,
    pub version: u64,
    pub closed: bool,
}

impl TableState {
    pub(crate) fn empty(name: Arc<str>) -> Self {
        TableState {
            name,
            columns: BTreeMap::new(),
            cells: FxHashMap::default(),
            next_column: 0,
            version: 0,
            closed: false,
        }
    }

    pub(crate) fn check_open(&self) -> Result<(), GridError> {
        if self.closed {
            Err(GridError::closed(&*self.name))
        } else {
            Ok(())
        }
    }

    pub(crate) fn column(&self, header: &ColumnHeader) -> Option<ColumnMeta> {
        self.columns.get(header).copied()
    }

    /// Returns the column's meta, allocating id and order on first touch.
    pub(crate) fn ensure_column(&mut self, header: &ColumnHeader) -> ColumnMeta {
        if let Some(meta) = self.columns.get(header) {
            return *meta;
        }
        let meta = ColumnMeta {
            id: self.next_column,
            order: self.next_column,
        };
        self.next_column += 1;
        self.columns.insert(header.clone(), meta);
        self.cells.insert(meta.id, Arc::new(BTreeMap::new()));
        meta
    }

    pub(crate) fn value(&self, id: u64, index: i64) -> CellValue {
        self.cells
            .get(&id)
            .and_then(|col| col.get(&index))
            .cloned()
            .unwrap_or(CellValue::Unit)
    }

    /// Writes `value` at (`id`, `index`); `Unit` removes the slot.
    /// Returns the previous value.
    pub(crate) fn put(&mut self, id: u64, index: i64, value: CellValue) -> CellValue {
        let Some(col) = self.cells.get_mut(&id) else {
            return CellValue::Unit;
        };
        let col = Arc::make_mut(col);
        if value.is_unit() {
            col.remove(&index).unwrap_or(CellValue::Unit)
        } else {
            col.insert(index, value).unwrap_or(CellValue::Unit)
        }
    }

    /// Headers in column order.
    pub(crate) fn ordered_headers(&self) -> Vec<(ColumnHeader, ColumnMeta)> {
        let mut headers: Vec<_> = self
            .columns
            .iter()
            .map(|(h, m)| (h.clone(), *m))
            .collect();
        headers.sort_by_key(|(_, m)| m.order);
        headers
    }
}

impl Versioned for TableState {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
