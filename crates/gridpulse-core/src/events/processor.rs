//! The publish/dispatch loop.
//!
//! The first `publish` on a clean thread becomes the batch owner: it
//! installs a [`DispatchPass`] in the thread-local slot and drains the
//! buffer until it is empty. Any nested `publish` on the same thread —
//! a listener writing cells from inside its callback — only appends to the
//! buffer and returns; the owning loop picks the events up on its next
//! iteration. This is what keeps listener-triggered mutations iterative
//! instead of recursive.
//!
//! The pass also carries the loop-guard state: the listener currently being
//! invoked and the set of listeners that have both run and published during
//! this pass. Dispatching to a member of that set without `allow_loop`
//! aborts the pass with [`GridError::ListenerLoop`].

use std::cell::RefCell;
use std::sync::Arc;

use gridpulse_common::{CellValue, GridError};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use super::listener::{
    new_listener_map, register, ListenerConfig, ListenerEntry, ListenerKey, ListenerMap,
    ListenerRef, ListenerShared,
};
use super::scope::ScopeMatcher;
use super::TableListenerEvent;
use crate::store::TableState;
use crate::table::{Cell, Column, Table};

type Entry = ListenerEntry<TableListenerEvent, ScopeMatcher>;
type Map = ListenerMap<TableListenerEvent, ScopeMatcher>;

/// Explicit dispatch context owned by the thread that runs the loop.
/// Constructed at the top of the owning `publish`, torn down by a guard.
struct DispatchPass {
    buffer: Vec<TableListenerEvent>,
    active: Option<ListenerKey>,
    invoked: FxHashSet<ListenerKey>,
}

thread_local! {
    static PASS: RefCell<Option<DispatchPass>> = const { RefCell::new(None) };
}

/// Clears the thread-local pass when the owning loop exits, on success,
/// error, and unwind alike.
struct PassGuard;

impl Drop for PassGuard {
    fn drop(&mut self) {
        PASS.with(|slot| slot.borrow_mut().take());
    }
}

/// Publishes a batch of cell changes into the engine.
///
/// Events may span tables: each drained batch is routed to the processor of
/// the table the event belongs to, in first-appearance order.
pub(crate) fn publish(events: Vec<TableListenerEvent>) -> Result<(), GridError> {
    if events.is_empty() {
        return Ok(());
    }

    let nested = PASS.with(|slot| {
        let mut slot = slot.borrow_mut();
        match slot.as_mut() {
            Some(pass) => {
                pass.buffer.extend(events.iter().cloned());
                // The listener currently running has now published: it is
                // a loop candidate for the rest of this pass.
                if let Some(active) = pass.active {
                    pass.invoked.insert(active);
                }
                true
            }
            None => {
                *slot = Some(DispatchPass {
                    buffer: events,
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
    debug!("dispatch pass started");
    loop {
        let batch: Vec<TableListenerEvent> = PASS.with(|slot| {
            slot.borrow_mut()
                .as_mut()
                .map(|pass| std::mem::take(&mut pass.buffer))
                .unwrap_or_default()
        });
        if batch.is_empty() {
            break;
        }
        for (table, group) in group_by_table(batch) {
            table.processor().dispatch_batch(&group)?;
        }
    }
    debug!("dispatch pass finished");
    Ok(())
}

fn group_by_table(
    batch: Vec<TableListenerEvent>,
) -> Vec<(Table, Vec<TableListenerEvent>)> {
    let mut groups: Vec<(Table, Vec<TableListenerEvent>)> = Vec::new();
    for event in batch {
        let table = event.new.column.table.clone();
        match groups.iter_mut().find(|(t, _)| t.same_table(&table)) {
            Some((_, group)) => group.push(event),
            None => groups.push((table, vec![event])),
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

/// Per-table listener registry and dispatch target. Scope kinds are
/// dispatched table → column → row → range → cell; within a kind,
/// ascending [`ListenerKey`].
pub struct TableEventProcessor {
    table_listeners: Map,
    column_listeners: Map,
    row_listeners: Map,
    range_listeners: Map,
    cell_listeners: Map,
}

impl TableEventProcessor {
    pub(crate) fn new() -> Self {
        TableEventProcessor {
            table_listeners: new_listener_map(),
            column_listeners: new_listener_map(),
            row_listeners: new_listener_map(),
            range_listeners: new_listener_map(),
            cell_listeners: new_listener_map(),
        }
    }

    fn map_for(&self, scope: &ScopeMatcher) -> &Map {
        match scope {
            ScopeMatcher::Table => &self.table_listeners,
            ScopeMatcher::Column { .. } => &self.column_listeners,
            ScopeMatcher::Row { .. } => &self.row_listeners,
            ScopeMatcher::Range { .. } => &self.range_listeners,
            ScopeMatcher::Cell { .. } => &self.cell_listeners,
        }
    }

    pub(crate) fn subscribe<F>(
        &self,
        table: &Table,
        scope: ScopeMatcher,
        config: F,
    ) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<TableListenerEvent>),
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

        // Watermark before insertion: anything newer than this snapshot
        // arrives through normal dispatch, anything at or before it through
        // history replay.
        let snapshot = table.snapshot();
        let map = self.map_for(&scope);
        let (reference, entry) = register(map, shared, meta, scope, snapshot.version, callback);

        if let Some(entry) = entry {
            trace!(key = ?entry.key, "listener subscribed");
            if !skip_history {
                let events = history_events(table, &snapshot, &entry.scope);
                if !events.is_empty() {
                    entry.deliver(&events);
                }
            }
        }
        Ok(reference)
    }

    fn dispatch_batch(&self, batch: &[TableListenerEvent]) -> Result<(), GridError> {
        let kinds = [
            &self.table_listeners,
            &self.column_listeners,
            &self.row_listeners,
            &self.range_listeners,
            &self.cell_listeners,
        ];
        for map in kinds {
            // Ordered snapshot; registration changes during the pass don't
            // coordinate with it.
            let entries: Vec<Arc<Entry>> = map.read().values().cloned().collect();
            for entry in entries {
                if !entry.shared.is_active() {
                    continue;
                }
                let filtered: Vec<TableListenerEvent> = batch
                    .iter()
                    .filter(|e| e.new.version > entry.watermark && entry.scope.matches(e))
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

    /// Drops every registration. Used by directory shutdown.
    pub(crate) fn shutdown(&self) {
        self.table_listeners.write().clear();
        self.column_listeners.write().clear();
        self.row_listeners.write().clear();
        self.range_listeners.write().clear();
        self.cell_listeners.write().clear();
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.table_listeners.read().len()
            + self.column_listeners.read().len()
            + self.row_listeners.read().len()
            + self.range_listeners.read().len()
            + self.cell_listeners.read().len()
    }
}

/// Synthesizes the one-time "old = empty, new = current" batch a fresh
/// listener receives, narrowed to its scope.
fn history_events(
    table: &Table,
    snapshot: &TableState,
    scope: &ScopeMatcher,
) -> Vec<TableListenerEvent> {
    let mut events = Vec::new();
    for (header, meta) in snapshot.ordered_headers() {
        let Some(cells) = snapshot.cells.get(&meta.id) else {
            continue;
        };
        for (&index, value) in cells.iter() {
            let column = Column::from_parts(table.clone(), header.clone(), meta);
            let event = TableListenerEvent::new(
                Cell {
                    column: column.clone(),
                    index,
                    value: CellValue::Unit,
                    version: snapshot.version,
                },
                Cell {
                    column,
                    index,
                    value: value.clone(),
                    version: snapshot.version,
                },
            );
            if scope.matches(&event) {
                events.push(event);
            }
        }
    }
    events
}
