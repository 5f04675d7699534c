//! The view-layer event engine.
//!
//! Structurally a sibling of the table engine: its own thread-local
//! dispatch pass with the same nested-publish and loop-guard behavior,
//! plus one addition the table engine does not have — a pause/flush
//! monitor used to buffer and rebase bursts of visual changes.
//!
//! The thread-local pass is consulted before the monitor is touched, so a
//! listener publishing from inside its callback appends to the owner's
//! buffer and never re-enters the monitor.

use std::cell::RefCell;
use std::sync::Arc;

use gridpulse_common::{ColumnHeader, GridError};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::events::{ViewKind, ViewListenerEvent, ViewValue};
use super::{TableView, ViewState};
use crate::events::listener::{
    new_listener_map, register, ListenerConfig, ListenerEntry, ListenerKey, ListenerMap,
    ListenerRef, ListenerShared,
};

type Entry = ListenerEntry<ViewListenerEvent, ViewScopeMatcher>;
type Map = ListenerMap<ViewListenerEvent, ViewScopeMatcher>;

/// Which view events a listener cares about. Column and row filters pass
/// events whose slot lacks the respective coordinate: a row-level change
/// is relevant to every column's view. Cell and derived-cell filters pass
/// when every coordinate the slot does carry matches.
#[derive(Debug, Clone)]
pub(crate) enum ViewScopeMatcher {
    View,
    Column { header: ColumnHeader },
    Row { index: i64 },
    Cell { header: ColumnHeader, index: i64 },
    DerivedCell { header: ColumnHeader, index: i64 },
}

impl ViewScopeMatcher {
    pub(crate) fn matches(&self, event: &ViewListenerEvent) -> bool {
        match self {
            ViewScopeMatcher::View => true,
            ViewScopeMatcher::Column { header } => {
                event.slot.column.as_ref().map_or(true, |h| h == header)
            }
            ViewScopeMatcher::Row { index } => {
                event.slot.index.map_or(true, |i| i == *index)
            }
            ViewScopeMatcher::Cell { header, index }
            | ViewScopeMatcher::DerivedCell { header, index } => {
                event.slot.column.as_ref().map_or(true, |h| h == header)
                    && event.slot.index.map_or(true, |i| i == *index)
            }
        }
    }
}

struct ViewPass {
    buffer: Vec<(TableView, ViewListenerEvent)>,
    active: Option<ListenerKey>,
    invoked: FxHashSet<ListenerKey>,
}

thread_local! {
    static PASS: RefCell<Option<ViewPass>> = const { RefCell::new(None) };
}

struct PassGuard;

impl Drop for PassGuard {
    fn drop(&mut self) {
        PASS.with(|slot| slot.borrow_mut().take());
    }
}

/// Publishes view changes. Same owner/nested split as the table engine;
/// each drained batch is routed through the owning view's processor,
/// where it either dispatches or lands in the pause buffer.
pub(crate) fn publish(view: &TableView, events: Vec<ViewListenerEvent>) -> Result<(), GridError> {
    if events.is_empty() {
        return Ok(());
    }

    let nested = PASS.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(pass) => {
                pass.buffer
                    .extend(events.iter().cloned().map(|e| (view.clone(), e)));
                if let Some(active) = pass.active {
                    pass.invoked.insert(active);
                }
                true
            }
            None => {
                *slot = Some(ViewPass {
                    buffer: events.into_iter().map(|e| (view.clone(), e)).collect(),
                    active: None,
                    invoked: FxHashSet::default(),
                });
                false
            }
        }
    });
    if nested {
        return Ok(());
    }

    let _guard = PassGuard;
    debug!("view dispatch pass started");
    loop {
        let batch: Vec<(TableView, ViewListenerEvent)> = PASS.with(|slot| {
            slot.borrow_mut()
                .as_mut()
                .map(|pass| std::mem::take(&mut pass.buffer))
                .unwrap_or_default()
        });
        if batch.is_empty() {
            break;
        }
        for (view, group) in group_by_view(batch) {
            view.processor().route(&group)?;
        }
    }
    debug!("view dispatch pass finished");
    Ok(())
}

fn group_by_view(
    batch: Vec<(TableView, ViewListenerEvent)>,
) -> Vec<(TableView, Vec<ViewListenerEvent>)> {
    let mut groups: Vec<(TableView, Vec<ViewListenerEvent>)> = Vec::new();
    for (view, event) in batch {
        match groups.iter_mut().find(|(v, _)| v.same_view(&view)) {
            Some((_, group)) => group.push(event),
            None => groups.push((view, vec![event])),
        }
    }
    groups
}

fn loop_check(entry: &Entry) -> Result<(), GridError> {
    if entry.allow_loop {
        return Ok(());
    }
    PASS.with(|slot| {
        let mut slot = slot.borrow_mut();
        let Some(pass) = slot.as_mut() else {
            return Ok(());
        };
        if pass.invoked.contains(&entry.key) {
            return Err(GridError::ListenerLoop {
                listener: entry.label.clone(),
            });
        }
        pass.active = Some(entry.key);
        Ok(())
    })
}

fn clear_active() {
    PASS.with(|slot| {
        if let Some(pass) = slot.borrow_mut().as_mut() {
            pass.active = None;
        }
    });
}

#[derive(Default)]
struct MonitorState {
    paused: bool,
    pending: Vec<ViewListenerEvent>,
}

/// Per-view listener registry, dispatch target, and pause monitor.
pub struct ViewEventProcessor {
    monitor: Mutex<MonitorState>,
    view_listeners: Map,
    column_listeners: Map,
    row_listeners: Map,
    cell_listeners: Map,
    derived_listeners: Map,
}

impl ViewEventProcessor {
    pub(crate) fn new() -> Self {
        ViewEventProcessor {
            monitor: Mutex::new(MonitorState::default()),
            view_listeners: new_listener_map(),
            column_listeners: new_listener_map(),
            row_listeners: new_listener_map(),
            cell_listeners: new_listener_map(),
            derived_listeners: new_listener_map(),
        }
    }

    fn map_for(&self, scope: &ViewScopeMatcher) -> &Map {
        match scope {
            ViewScopeMatcher::View => &self.view_listeners,
            ViewScopeMatcher::Column { .. } => &self.column_listeners,
            ViewScopeMatcher::Row { .. } => &self.row_listeners,
            ViewScopeMatcher::Cell { .. } => &self.cell_listeners,
            ViewScopeMatcher::DerivedCell { .. } => &self.derived_listeners,
        }
    }

    /// Begins buffering published events. Returns false when already
    /// paused, in which case the earlier pause stays in charge.
    pub(crate) fn pause(&self) -> bool {
        let mut monitor = self.monitor.lock();
        if monitor.paused {
            return false;
        }
        monitor.paused = true;
        debug!("view paused");
        true
    }

    /// Stops buffering and dispatches what accumulated. With `rebase`,
    /// the buffer is first collapsed to one event per (slot, kind).
    pub(crate) fn flush(&self, view: &TableView, rebase: bool) -> Result<(), GridError> {
        let pending = {
            let mut monitor = self.monitor.lock();
            if !monitor.paused {
                return Ok(());
            }
            monitor.paused = false;
            std::mem::take(&mut monitor.pending)
        };
        debug!(events = pending.len(), rebase, "view flushed");
        let batch = if rebase { rebase_events(pending) } else { pending };
        publish(view, batch)
    }

    /// A drained batch arrives here: into the pause buffer when paused,
    /// straight to dispatch otherwise. The monitor is released before any
    /// callback runs.
    fn route(&self, batch: &[ViewListenerEvent]) -> Result<(), GridError> {
        {
            let mut monitor = self.monitor.lock();
            if monitor.paused {
                monitor.pending.extend(batch.iter().cloned());
                return Ok(());
            }
        }
        self.dispatch_batch(batch)
    }

    pub(crate) fn subscribe<F>(
        &self,
        view: &TableView,
        scope: ViewScopeMatcher,
        config: F,
    ) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<ViewListenerEvent>),
    {
        let shared = ListenerShared::new();
        let mut cfg = ListenerConfig::new(Arc::clone(&shared));
        config(&mut cfg);
        let ListenerConfig {
            meta,
            skip_history,
            callback,
            ..
        } = cfg;

        let snapshot = view.snapshot();
        let map = self.map_for(&scope);
        let (reference, entry) = register(map, shared, meta, scope, snapshot.version, callback);

        if let Some(entry) = entry {
            trace!(key = ?entry.key, "view listener subscribed");
            if !skip_history {
                let events = history_events(&snapshot, &entry.scope);
                if !events.is_empty() {
                    entry.deliver(&events);
                }
            }
        }
        Ok(reference)
    }

    fn dispatch_batch(&self, batch: &[ViewListenerEvent]) -> Result<(), GridError> {
        let kinds = [
            &self.view_listeners,
            &self.column_listeners,
            &self.row_listeners,
            &self.cell_listeners,
            &self.derived_listeners,
        ];
        for map in kinds {
            let entries: Vec<Arc<Entry>> = map.read().values().cloned().collect();
            for entry in entries {
                if !entry.shared.is_active() {
                    continue;
                }
                let filtered: Vec<ViewListenerEvent> = batch
                    .iter()
                    .filter(|e| e.version > entry.watermark && entry.scope.matches(e))
                    .cloned()
                    .collect();
                if filtered.is_empty() {
                    continue;
                }
                loop_check(&entry)?;
                entry.deliver(&filtered);
                if !entry.allow_loop {
                    clear_active();
                }
            }
        }
        Ok(())
    }

    pub(crate) fn shutdown(&self) {
        {
            let mut monitor = self.monitor.lock();
            monitor.paused = false;
            monitor.pending.clear();
        }
        self.view_listeners.write().clear();
        self.column_listeners.write().clear();
        self.row_listeners.write().clear();
        self.cell_listeners.write().clear();
        self.derived_listeners.write().clear();
    }
}

/// Collapses a paused buffer to one event per (slot, kind): the surviving
/// event keeps the position and `new` of the LAST occurrence and the `old`
/// of the FIRST, so the batch reads as if each property changed once.
fn rebase_events(events: Vec<ViewListenerEvent>) -> Vec<ViewListenerEvent> {
    type Key = (Option<ColumnHeader>, Option<i64>, ViewKind);
    let mut first_old: FxHashMap<Key, ViewValue> = FxHashMap::default();
    let mut out: Vec<ViewListenerEvent> = Vec::new();
    for mut event in events {
        let key: Key = (event.slot.column.clone(), event.slot.index, event.kind);
        let old = first_old
            .entry(key.clone())
            .or_insert_with(|| event.old.clone())
            .clone();
        out.retain(|e| (e.slot.column.clone(), e.slot.index, e.kind) != key);
        event.old = old;
        out.push(event);
    }
    out
}

/// One-time replay for a fresh view listener: every set property in its
/// scope as an `Unset -> current` event at the snapshot version.
fn history_events(snapshot: &ViewState, scope: &ViewScopeMatcher) -> Vec<ViewListenerEvent> {
    let mut events = Vec::new();
    for (slot, style) in snapshot.entries.iter() {
        let mut push = |kind: ViewKind, new: ViewValue| {
            let event = ViewListenerEvent {
                slot: slot.clone(),
                kind,
                old: ViewValue::Unset,
                new,
                version: snapshot.version,
            };
            if scope.matches(&event) {
                events.push(event);
            }
        };
        if let Some(px) = style.height {
            push(ViewKind::Height, ViewValue::Px(px));
        }
        if let Some(px) = style.width {
            push(ViewKind::Width, ViewValue::Px(px));
        }
        if !style.classes.is_empty() {
            push(ViewKind::Classes, ViewValue::Classes(style.classes.clone()));
        }
        if !style.topics.is_empty() {
            push(ViewKind::Topics, ViewValue::Topics(style.topics.clone()));
        }
    }
    events
}
