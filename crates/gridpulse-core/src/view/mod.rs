//! Visual metadata over a table: per-slot heights, widths, CSS classes,
//! and topics, with its own versioned store and event engine.
//!
//! A [`TableView`] does not touch cell data. It shares only the table
//! handle; its state lives in a separate [`SnapshotCell`] and its events
//! flow through a separate dispatch pass.

mod events;
pub(crate) mod processor;

pub use events::{ViewKind, ViewListenerEvent, ViewSlot, ViewValue};
pub use processor::ViewEventProcessor;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gridpulse_common::{ColumnHeader, GridError};
use tracing::debug;

use crate::events::{ListenerConfig, ListenerRef};
use crate::store::{SnapshotCell, Versioned};
use crate::table::Table;
use processor::ViewScopeMatcher;

/// Properties set at one slot. An entry with nothing set is dropped from
/// the state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SlotStyle {
    pub height: Option<u64>,
    pub width: Option<u64>,
    pub classes: BTreeSet<String>,
    pub topics: BTreeSet<String>,
}

impl SlotStyle {
    fn is_empty(&self) -> bool {
        self.height.is_none()
            && self.width.is_none()
            && self.classes.is_empty()
            && self.topics.is_empty()
    }

    fn value(&self, kind: ViewKind) -> ViewValue {
        match kind {
            ViewKind::Height => self.height.map(ViewValue::Px).unwrap_or_default(),
            ViewKind::Width => self.width.map(ViewValue::Px).unwrap_or_default(),
            ViewKind::Classes => {
                if self.classes.is_empty() {
                    ViewValue::Unset
                } else {
                    ViewValue::Classes(self.classes.clone())
                }
            }
            ViewKind::Topics => {
                if self.topics.is_empty() {
                    ViewValue::Unset
                } else {
                    ViewValue::Topics(self.topics.clone())
                }
            }
        }
    }

    fn apply(&mut self, kind: ViewKind, value: &ViewValue) {
        match (kind, value) {
            (ViewKind::Height, ViewValue::Px(px)) => self.height = Some(*px),
            (ViewKind::Height, _) => self.height = None,
            (ViewKind::Width, ViewValue::Px(px)) => self.width = Some(*px),
            (ViewKind::Width, _) => self.width = None,
            (ViewKind::Classes, ViewValue::Classes(set)) => self.classes = set.clone(),
            (ViewKind::Classes, _) => self.classes.clear(),
            (ViewKind::Topics, ViewValue::Topics(set)) => self.topics = set.clone(),
            (ViewKind::Topics, _) => self.topics.clear(),
        }
    }
}

/// Immutable snapshot of all visual metadata of one view.
#[derive(Debug, Clone)]
pub(crate) struct ViewState {
    pub name: Arc<str>,
    pub entries: BTreeMap<ViewSlot, SlotStyle>,
    pub version: u64,
    pub closed: bool,
}

impl ViewState {
    fn empty(name: Arc<str>) -> Self {
        ViewState {
            name,
            entries: BTreeMap::new(),
            version: 0,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<(), GridError> {
        if self.closed {
            Err(GridError::closed(&*self.name))
        } else {
            Ok(())
        }
    }

    fn value(&self, slot: &ViewSlot, kind: ViewKind) -> ViewValue {
        self.entries
            .get(slot)
            .map(|style| style.value(kind))
            .unwrap_or_default()
    }
}

impl Versioned for ViewState {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

struct ViewCore {
    name: Arc<str>,
    table: Table,
    state: SnapshotCell<ViewState>,
    processor: ViewEventProcessor,
}

/// Handle to one table view. Clones share the same state and listeners.
#[derive(Clone)]
pub struct TableView {
    core: Arc<ViewCore>,
}

/// The fully resolved visual properties of one cell: the most specific
/// height/width wins (cell, then row, then column, then table defaults);
/// classes and topics are the union of all four slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedCellView {
    pub height: Option<u64>,
    pub width: Option<u64>,
    pub classes: BTreeSet<String>,
    pub topics: BTreeSet<String>,
}

impl TableView {
    /// Creates a view over `table` and registers it in the directory under
    /// the table's name.
    pub fn new(table: &Table) -> TableView {
        let view = TableView::new_detached(table);
        crate::directory::set_view(table.name(), view.clone());
        view
    }

    pub fn new_detached(table: &Table) -> TableView {
        let name: Arc<str> = table.name().into();
        TableView {
            core: Arc::new(ViewCore {
                name: Arc::clone(&name),
                table: table.clone(),
                state: SnapshotCell::new(ViewState::empty(name)),
                processor: ViewEventProcessor::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn table(&self) -> &Table {
        &self.core.table
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn is_closed(&self) -> bool {
        self.snapshot().closed
    }

    pub fn set_height(&self, slot: &ViewSlot, px: u64) -> Result<(), GridError> {
        self.apply(slot, ViewKind::Height, ViewValue::Px(px))
    }

    pub fn clear_height(&self, slot: &ViewSlot) -> Result<(), GridError> {
        self.apply(slot, ViewKind::Height, ViewValue::Unset)
    }

    pub fn set_width(&self, slot: &ViewSlot, px: u64) -> Result<(), GridError> {
        self.apply(slot, ViewKind::Width, ViewValue::Px(px))
    }

    pub fn clear_width(&self, slot: &ViewSlot) -> Result<(), GridError> {
        self.apply(slot, ViewKind::Width, ViewValue::Unset)
    }

    pub fn set_classes(
        &self,
        slot: &ViewSlot,
        classes: BTreeSet<String>,
    ) -> Result<(), GridError> {
        let value = if classes.is_empty() {
            ViewValue::Unset
        } else {
            ViewValue::Classes(classes)
        };
        self.apply(slot, ViewKind::Classes, value)
    }

    pub fn clear_classes(&self, slot: &ViewSlot) -> Result<(), GridError> {
        self.apply(slot, ViewKind::Classes, ViewValue::Unset)
    }

    pub fn set_topics(&self, slot: &ViewSlot, topics: BTreeSet<String>) -> Result<(), GridError> {
        let value = if topics.is_empty() {
            ViewValue::Unset
        } else {
            ViewValue::Topics(topics)
        };
        self.apply(slot, ViewKind::Topics, value)
    }

    pub fn clear_topics(&self, slot: &ViewSlot) -> Result<(), GridError> {
        self.apply(slot, ViewKind::Topics, ViewValue::Unset)
    }

    pub fn height(&self, slot: &ViewSlot) -> Option<u64> {
        match self.snapshot().value(slot, ViewKind::Height) {
            ViewValue::Px(px) => Some(px),
            _ => None,
        }
    }

    pub fn width(&self, slot: &ViewSlot) -> Option<u64> {
        match self.snapshot().value(slot, ViewKind::Width) {
            ViewValue::Px(px) => Some(px),
            _ => None,
        }
    }

    pub fn classes(&self, slot: &ViewSlot) -> BTreeSet<String> {
        match self.snapshot().value(slot, ViewKind::Classes) {
            ViewValue::Classes(set) => set,
            _ => BTreeSet::new(),
        }
    }

    pub fn topics(&self, slot: &ViewSlot) -> BTreeSet<String> {
        match self.snapshot().value(slot, ViewKind::Topics) {
            ViewValue::Topics(set) => set,
            _ => BTreeSet::new(),
        }
    }

    /// Resolves the view of one cell across its four slots.
    pub fn derived(&self, header: &ColumnHeader, index: i64) -> DerivedCellView {
        let snapshot = self.snapshot();
        let slots = [
            ViewSlot::cell(header.clone(), index),
            ViewSlot::row(index),
            ViewSlot::column(header.clone()),
            ViewSlot::table(),
        ];
        let mut derived = DerivedCellView::default();
        for slot in &slots {
            let Some(style) = snapshot.entries.get(slot) else {
                continue;
            };
            if derived.height.is_none() {
                derived.height = style.height;
            }
            if derived.width.is_none() {
                derived.width = style.width;
            }
            derived.classes.extend(style.classes.iter().cloned());
            derived.topics.extend(style.topics.iter().cloned());
        }
        derived
    }

    /// Begins buffering events; false if a pause is already in effect.
    pub fn pause(&self) -> bool {
        self.core.processor.pause()
    }

    /// Ends the pause and dispatches the buffered events; `rebase`
    /// collapses them to one per (slot, property) first.
    pub fn flush(&self, rebase: bool) -> Result<(), GridError> {
        self.core.processor.flush(self, rebase)
    }

    /// Subscribes a listener for every view change.
    pub fn on<F>(&self, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<ViewListenerEvent>),
    {
        self.core
            .processor
            .subscribe(self, ViewScopeMatcher::View, config)
    }

    /// Subscribes for changes relevant to one column (including row-level
    /// and table-level changes, which apply to every column).
    pub fn on_column<F>(&self, header: &ColumnHeader, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<ViewListenerEvent>),
    {
        self.core.processor.subscribe(
            self,
            ViewScopeMatcher::Column {
                header: header.clone(),
            },
            config,
        )
    }

    /// Subscribes for changes relevant to one row.
    pub fn on_row<F>(&self, index: i64, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<ViewListenerEvent>),
    {
        self.core
            .processor
            .subscribe(self, ViewScopeMatcher::Row { index }, config)
    }

    /// Subscribes for changes at or above one cell's slots.
    pub fn on_cell<F>(
        &self,
        header: &ColumnHeader,
        index: i64,
        config: F,
    ) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<ViewListenerEvent>),
    {
        self.core.processor.subscribe(
            self,
            ViewScopeMatcher::Cell {
                header: header.clone(),
                index,
            },
            config,
        )
    }

    /// Subscribes for changes that affect one cell's derived view.
    pub fn on_derived<F>(
        &self,
        header: &ColumnHeader,
        index: i64,
        config: F,
    ) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<ViewListenerEvent>),
    {
        self.core.processor.subscribe(
            self,
            ViewScopeMatcher::DerivedCell {
                header: header.clone(),
                index,
            },
            config,
        )
    }

    fn apply(&self, slot: &ViewSlot, kind: ViewKind, value: ViewValue) -> Result<(), GridError> {
        let updated = self.core.state.update(|s| {
            s.check_open()?;
            if s.value(slot, kind) == value {
                return Ok(None);
            }
            let mut next = s.clone();
            let style = next.entries.entry(slot.clone()).or_default();
            style.apply(kind, &value);
            if style.is_empty() {
                next.entries.remove(slot);
            }
            Ok(Some(next))
        })?;
        let Some((prev, next)) = updated else {
            return Ok(());
        };
        debug!(?slot, ?kind, "view property changed");
        let old = prev.value(slot, kind);
        processor::publish(
            self,
            vec![ViewListenerEvent {
                slot: slot.clone(),
                kind,
                old,
                new: value,
                version: next.version,
            }],
        )
    }

    pub(crate) fn snapshot(&self) -> Arc<ViewState> {
        self.core.state.load()
    }

    pub(crate) fn processor(&self) -> &ViewEventProcessor {
        &self.core.processor
    }

    pub(crate) fn same_view(&self, other: &TableView) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Marks the view closed and drops every listener registration.
    pub(crate) fn close(&self) {
        let _ = self.core.state.update(|s| {
            if s.closed {
                return Ok(None);
            }
            let mut next = s.clone();
            next.closed = true;
            Ok(Some(next))
        });
        self.core.processor.shutdown();
    }
}

impl std::fmt::Debug for TableView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableView")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}
