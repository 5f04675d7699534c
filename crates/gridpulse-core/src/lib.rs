//! Reactive data grid engine.
//!
//! Tables hold cells addressed by (column header, row index) over an
//! immutable, versioned snapshot store. Every mutation publishes a batch
//! of change events through a scope-filtered listener engine: listeners
//! subscribe at table, column, row, range, or cell granularity, replay
//! pre-existing state once on subscribe, run in a deterministic order,
//! and may themselves mutate tables — such nested writes are queued and
//! dispatched iteratively, with a loop guard aborting unbounded
//! listener-to-listener cycles.
//!
//! ```
//! use gridpulse_core::{header, CellValue, Table};
//!
//! let table = Table::new_detached("inventory");
//! let sub = table.column(&header("Total"))?.on(|cfg| {
//!     cfg.name("audit").events(|events| {
//!         for e in events {
//!             println!("{} -> {}", e.old.value, e.new.value);
//!         }
//!     });
//! })?;
//!
//! table.set(&header("Total"), 0, 42i64)?;
//! sub.unsubscribe();
//! # Ok::<(), gridpulse_core::GridError>(())
//! ```

pub mod directory;
pub mod events;
pub(crate) mod store;
pub mod table;
pub mod view;

pub use events::{ListenerConfig, ListenerKey, ListenerRef, TableEventProcessor, TableListenerEvent};
pub use table::{Cell, CellRange, Column, Row, Table};
pub use view::{
    DerivedCellView, TableView, ViewEventProcessor, ViewKind, ViewListenerEvent, ViewSlot,
    ViewValue,
};

pub use gridpulse_common::{header, CellValue, ColumnHeader, GridError, WebContent};
