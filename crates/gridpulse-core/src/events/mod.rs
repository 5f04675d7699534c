//! The table-layer event engine: listener registration, scope filtering,
//! and the batched publish/dispatch loop.

pub(crate) mod listener;
pub(crate) mod processor;
pub(crate) mod scope;

pub use listener::{ListenerConfig, ListenerKey, ListenerRef};
pub use processor::TableEventProcessor;

use crate::table::Cell;

/// One cell change: the value before and after, each tagged with its owning
/// column and row index. `new.version` is the store version produced by the
/// mutation that generated the event.
#[derive(Debug, Clone)]
pub struct TableListenerEvent {
    pub old: Cell,
    pub new: Cell,
}

impl TableListenerEvent {
    pub(crate) fn new(old: Cell, new: Cell) -> Self {
        TableListenerEvent { old, new }
    }
}
