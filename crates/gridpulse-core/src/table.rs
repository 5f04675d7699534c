//! Table, column, row, range, and cell handles.
//!
//! A [`Table`] is a cheap-clone handle onto the shared core: one
//! [`SnapshotCell`](crate::store::SnapshotCell) holding the versioned state
//! and one [`TableEventProcessor`] holding the listener registries. All
//! other handles are thin value types carrying a `Table` plus location, so
//! they stay valid across mutations — identity lives in the state, not in
//! the handle.

use std::sync::Arc;

use gridpulse_common::{CellValue, ColumnHeader, GridError};
use tracing::debug;

use crate::events::processor::publish;
use crate::events::scope::ScopeMatcher;
use crate::events::{ListenerConfig, ListenerRef, TableEventProcessor, TableListenerEvent};
use crate::store::{ColumnMeta, SnapshotCell, TableState};

pub(crate) struct TableCore {
    name: Arc<str>,
    state: SnapshotCell<TableState>,
    processor: TableEventProcessor,
}

/// Handle to one table. Clones share the same underlying store and
/// listener registry.
#[derive(Clone)]
pub struct Table {
    core: Arc<TableCore>,
}

impl Table {
    /// Creates a table and registers it in the process-wide directory.
    pub fn new(name: &str) -> Table {
        let table = Table::new_detached(name);
        crate::directory::set(name, table.clone());
        table
    }

    /// Creates a table without registering it anywhere.
    pub fn new_detached(name: &str) -> Table {
        let name: Arc<str> = name.into();
        Table {
            core: Arc::new(TableCore {
                name: Arc::clone(&name),
                state: SnapshotCell::new(TableState::empty(name)),
                processor: TableEventProcessor::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    pub fn is_closed(&self) -> bool {
        self.snapshot().closed
    }

    /// Returns the column handle, creating the column on first touch.
    pub fn column(&self, header: &ColumnHeader) -> Result<Column, GridError> {
        if header.is_empty() {
            return Err(GridError::invalid_column("empty header"));
        }
        if let Some(meta) = self.snapshot().column(header) {
            return Ok(Column::from_parts(self.clone(), header.clone(), meta));
        }
        self.core.state.update(|s| {
            s.check_open()?;
            if s.column(header).is_some() {
                return Ok(None);
            }
            let mut next = s.clone();
            next.ensure_column(header);
            Ok(Some(next))
        })?;
        debug!(table = %self.core.name, %header, "column created");
        let meta = self
            .snapshot()
            .column(header)
            .ok_or_else(|| GridError::invalid_column(format!("column {header} vanished")))?;
        Ok(Column::from_parts(self.clone(), header.clone(), meta))
    }

    /// Headers in column order.
    pub fn headers(&self) -> Vec<ColumnHeader> {
        self.snapshot()
            .ordered_headers()
            .into_iter()
            .map(|(h, _)| h)
            .collect()
    }

    /// Column handles in column order.
    pub fn columns(&self) -> Vec<Column> {
        self.snapshot()
            .ordered_headers()
            .into_iter()
            .map(|(h, m)| Column::from_parts(self.clone(), h, m))
            .collect()
    }

    pub fn contains_column(&self, header: &ColumnHeader) -> bool {
        self.snapshot().column(header).is_some()
    }

    /// Writes `value` at (`header`, `index`) and publishes the change.
    /// Writing `Unit` clears the cell; clearing an absent cell is a no-op.
    pub fn set(
        &self,
        header: &ColumnHeader,
        index: i64,
        value: impl Into<CellValue>,
    ) -> Result<(), GridError> {
        let value = value.into();
        if header.is_empty() {
            return Err(GridError::invalid_column("empty header"));
        }
        let updated = self.core.state.update(|s| {
            s.check_open()?;
            if value.is_unit() {
                let absent = s
                    .column(header)
                    .map_or(true, |m| s.value(m.id, index).is_unit());
                if absent {
                    return Ok(None);
                }
            }
            let mut next = s.clone();
            let meta = next.ensure_column(header);
            next.put(meta.id, index, value.clone());
            Ok(Some(next))
        })?;
        let Some((prev, next)) = updated else {
            return Ok(());
        };
        let meta = next
            .column(header)
            .ok_or_else(|| GridError::invalid_column(format!("column {header} vanished")))?;
        let column = Column::from_parts(self.clone(), header.clone(), meta);
        let old_value = prev
            .column(header)
            .map(|m| prev.value(m.id, index))
            .unwrap_or(CellValue::Unit);
        publish(vec![TableListenerEvent::new(
            Cell {
                column: column.clone(),
                index,
                value: old_value,
                version: prev.version,
            },
            Cell {
                column,
                index,
                value,
                version: next.version,
            },
        )])
    }

    pub fn clear(&self, header: &ColumnHeader, index: i64) -> Result<(), GridError> {
        self.set(header, index, CellValue::Unit)
    }

    /// Current value at (`header`, `index`); `Unit` when absent. Reading
    /// never creates columns and never fails.
    pub fn get(&self, header: &ColumnHeader, index: i64) -> CellValue {
        let snapshot = self.snapshot();
        snapshot
            .column(header)
            .map(|m| snapshot.value(m.id, index))
            .unwrap_or(CellValue::Unit)
    }

    /// Cell handle at (`header`, `index`), creating the column on first
    /// touch.
    pub fn cell(&self, header: &ColumnHeader, index: i64) -> Result<Cell, GridError> {
        Ok(self.column(header)?.cell(index))
    }

    /// Removes a column and publishes one clear event per cell it held.
    pub fn remove_column(&self, header: &ColumnHeader) -> Result<(), GridError> {
        let updated = self.core.state.update(|s| {
            s.check_open()?;
            let Some(meta) = s.column(header) else {
                return Ok(None);
            };
            let mut next = s.clone();
            next.columns.remove(header);
            next.cells.remove(&meta.id);
            Ok(Some(next))
        })?;
        let Some((prev, next)) = updated else {
            return Ok(());
        };
        debug!(table = %self.core.name, %header, "column removed");
        let Some(meta) = prev.column(header) else {
            return Ok(());
        };
        let column = Column::from_parts(self.clone(), header.clone(), meta);
        let events: Vec<TableListenerEvent> = prev
            .cells
            .get(&meta.id)
            .map(|cells| {
                cells
                    .iter()
                    .map(|(&index, value)| {
                        TableListenerEvent::new(
                            Cell {
                                column: column.clone(),
                                index,
                                value: value.clone(),
                                version: prev.version,
                            },
                            Cell {
                                column: column.clone(),
                                index,
                                value: CellValue::Unit,
                                version: next.version,
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        publish(events)
    }

    /// Renames a column in place. Column id and order are preserved, so
    /// existing handles and subscriptions keep matching; no events fire.
    pub fn rename_column(
        &self,
        existing: &ColumnHeader,
        new_header: &ColumnHeader,
    ) -> Result<(), GridError> {
        if new_header.is_empty() {
            return Err(GridError::invalid_column("empty header"));
        }
        self.core.state.update(|s| {
            s.check_open()?;
            let Some(meta) = s.column(existing) else {
                return Err(GridError::invalid_column(format!("no column {existing}")));
            };
            if s.columns.contains_key(new_header) {
                return Err(GridError::invalid_column(format!(
                    "column {new_header} already exists"
                )));
            }
            let mut next = s.clone();
            next.columns.remove(existing);
            next.columns.insert(new_header.clone(), meta);
            Ok(Some(next))
        })?;
        debug!(table = %self.core.name, from = %existing, to = %new_header, "column renamed");
        Ok(())
    }

    /// Clears `index` across every column, publishing one event per cell
    /// that actually held a value.
    pub fn remove_row(&self, index: i64) -> Result<(), GridError> {
        let updated = self.core.state.update(|s| {
            s.check_open()?;
            let populated: Vec<u64> = s
                .cells
                .iter()
                .filter(|(_, col)| col.contains_key(&index))
                .map(|(&id, _)| id)
                .collect();
            if populated.is_empty() {
                return Ok(None);
            }
            let mut next = s.clone();
            for id in populated {
                next.put(id, index, CellValue::Unit);
            }
            Ok(Some(next))
        })?;
        let Some((prev, next)) = updated else {
            return Ok(());
        };
        let mut events = Vec::new();
        for (header, meta) in prev.ordered_headers() {
            let old_value = prev.value(meta.id, index);
            if old_value.is_unit() {
                continue;
            }
            let column = Column::from_parts(self.clone(), header, meta);
            events.push(TableListenerEvent::new(
                Cell {
                    column: column.clone(),
                    index,
                    value: old_value,
                    version: prev.version,
                },
                Cell {
                    column,
                    index,
                    value: CellValue::Unit,
                    version: next.version,
                },
            ));
        }
        publish(events)
    }

    /// A rectangular range spanning the two corner locations (in either
    /// order). Both corner columns are created on first touch.
    pub fn range(
        &self,
        from_header: &ColumnHeader,
        from_index: i64,
        to_header: &ColumnHeader,
        to_index: i64,
    ) -> Result<CellRange, GridError> {
        let from = self.column(from_header)?;
        let to = self.column(to_header)?;
        let (start, end) = if from.order <= to.order {
            (from, to)
        } else {
            (to, from)
        };
        Ok(CellRange {
            table: self.clone(),
            start_order: start.order,
            end_order: end.order,
            start_index: from_index.min(to_index),
            end_index: from_index.max(to_index),
        })
    }

    /// All cells, column order first, then ascending row index.
    pub fn iter(&self) -> impl Iterator<Item = Cell> {
        let snapshot = self.snapshot();
        let mut cells = Vec::new();
        for (header, meta) in snapshot.ordered_headers() {
            let Some(column_cells) = snapshot.cells.get(&meta.id) else {
                continue;
            };
            for (&index, value) in column_cells.iter() {
                cells.push(Cell {
                    column: Column::from_parts(self.clone(), header.clone(), meta),
                    index,
                    value: value.clone(),
                    version: snapshot.version,
                });
            }
        }
        cells.into_iter()
    }

    /// Snapshot clone under a new name: shares no future state, keeps the
    /// version counter, and starts with a fresh (empty) listener registry.
    pub fn clone_table(&self, name: &str) -> Table {
        let mut state = (*self.snapshot()).clone();
        let name: Arc<str> = name.into();
        state.name = Arc::clone(&name);
        state.closed = false;
        Table {
            core: Arc::new(TableCore {
                name,
                state: SnapshotCell::new(state),
                processor: TableEventProcessor::new(),
            }),
        }
    }

    /// Subscribes a table-scoped listener: it sees every change.
    pub fn on<F>(&self, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<TableListenerEvent>),
    {
        self.core.processor.subscribe(self, ScopeMatcher::Table, config)
    }

    pub(crate) fn snapshot(&self) -> Arc<TableState> {
        self.core.state.load()
    }

    pub(crate) fn processor(&self) -> &TableEventProcessor {
        &self.core.processor
    }

    pub(crate) fn same_table(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Marks the store closed and drops every listener registration.
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

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

/// Handle to one column of one table.
#[derive(Debug, Clone)]
pub struct Column {
    pub(crate) table: Table,
    pub header: ColumnHeader,
    pub(crate) id: u64,
    pub(crate) order: u64,
}

impl Column {
    pub(crate) fn from_parts(table: Table, header: ColumnHeader, meta: ColumnMeta) -> Self {
        Column {
            table,
            header,
            id: meta.id,
            order: meta.order,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn set(&self, index: i64, value: impl Into<CellValue>) -> Result<(), GridError> {
        self.table.set(&self.header, index, value)
    }

    pub fn get(&self, index: i64) -> CellValue {
        self.table.get(&self.header, index)
    }

    pub fn clear(&self, index: i64) -> Result<(), GridError> {
        self.table.clear(&self.header, index)
    }

    pub fn cell(&self, index: i64) -> Cell {
        Cell {
            column: self.clone(),
            index,
            value: self.get(index),
            version: self.table.version(),
        }
    }

    /// Cells of this column in ascending row order.
    pub fn iter(&self) -> impl Iterator<Item = Cell> {
        let column = self.clone();
        let snapshot = self.table.snapshot();
        let cells: Vec<Cell> = snapshot
            .cells
            .get(&self.id)
            .map(|m| {
                m.iter()
                    .map(|(&index, value)| Cell {
                        column: column.clone(),
                        index,
                        value: value.clone(),
                        version: snapshot.version,
                    })
                    .collect()
            })
            .unwrap_or_default();
        cells.into_iter()
    }

    /// Subscribes a column-scoped listener.
    pub fn on<F>(&self, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<TableListenerEvent>),
    {
        self.table.processor().subscribe(
            &self.table,
            ScopeMatcher::Column {
                id: self.id,
                header: self.header.clone(),
            },
            config,
        )
    }
}

/// Handle to one row index of one table.
#[derive(Debug, Clone)]
pub struct Row {
    pub(crate) table: Table,
    pub index: i64,
}

impl Row {
    pub fn new(table: &Table, index: i64) -> Row {
        Row {
            table: table.clone(),
            index,
        }
    }

    /// Cells present at this index, in column order.
    pub fn iter(&self) -> impl Iterator<Item = Cell> {
        let index = self.index;
        let cells: Vec<Cell> = self
            .table
            .iter()
            .filter(|c| c.index == index)
            .collect();
        cells.into_iter()
    }

    /// Subscribes a row-scoped listener.
    pub fn on<F>(&self, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<TableListenerEvent>),
    {
        self.table
            .processor()
            .subscribe(&self.table, ScopeMatcher::Row { index: self.index }, config)
    }
}

impl Table {
    pub fn row(&self, index: i64) -> Row {
        Row::new(self, index)
    }
}

/// A rectangular cell range: column order × row index, both inclusive.
#[derive(Debug, Clone)]
pub struct CellRange {
    pub(crate) table: Table,
    pub(crate) start_order: u64,
    pub(crate) end_order: u64,
    pub(crate) start_index: i64,
    pub(crate) end_index: i64,
}

impl CellRange {
    pub fn contains(&self, cell: &Cell) -> bool {
        cell.column.order >= self.start_order
            && cell.column.order <= self.end_order
            && cell.index >= self.start_index
            && cell.index <= self.end_index
    }

    /// Subscribes a range-scoped listener.
    pub fn on<F>(&self, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<TableListenerEvent>),
    {
        self.table.processor().subscribe(
            &self.table,
            ScopeMatcher::Range {
                start_order: self.start_order,
                end_order: self.end_order,
                start_index: self.start_index,
                end_index: self.end_index,
            },
            config,
        )
    }
}

/// A cell snapshot: location plus the value observed at `version`.
#[derive(Debug, Clone)]
pub struct Cell {
    pub column: Column,
    pub index: i64,
    pub value: CellValue,
    pub version: u64,
}

impl Cell {
    /// Subscribes a cell-scoped listener at this cell's location.
    pub fn on<F>(&self, config: F) -> Result<ListenerRef, GridError>
    where
        F: FnOnce(&mut ListenerConfig<TableListenerEvent>),
    {
        self.column.table.processor().subscribe(
            &self.column.table,
            ScopeMatcher::Cell {
                id: self.column.id,
                header: self.column.header.clone(),
                index: self.index,
            },
            config,
        )
    }
}
