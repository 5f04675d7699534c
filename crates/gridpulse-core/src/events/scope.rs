//! Scope matching: which events in a batch are relevant to a listener.
//!
//! One enum covers all five scope kinds. Column identity is matched by the
//! stable column id first (fast path for handles from the same table
//! generation) and by header equality as the authoritative relation — a
//! handle that predates a rename still matches by id, a fresh handle by
//! header.

use gridpulse_common::ColumnHeader;

use super::TableListenerEvent;
use crate::table::Cell;

#[derive(Debug, Clone)]
pub(crate) enum ScopeMatcher {
    Table,
    Column {
        id: u64,
        header: ColumnHeader,
    },
    Row {
        index: i64,
    },
    Range {
        start_order: u64,
        end_order: u64,
        start_index: i64,
        end_index: i64,
    },
    Cell {
        id: u64,
        header: ColumnHeader,
        index: i64,
    },
}

impl ScopeMatcher {
    pub(crate) fn matches(&self, event: &TableListenerEvent) -> bool {
        match self {
            ScopeMatcher::Table => true,
            ScopeMatcher::Column { id, header } => {
                column_matches(&event.new, *id, header) || column_matches(&event.old, *id, header)
            }
            ScopeMatcher::Row { index } => {
                event.new.index == *index || event.old.index == *index
            }
            ScopeMatcher::Range {
                start_order,
                end_order,
                start_index,
                end_index,
            } => {
                let contains = |cell: &Cell| {
                    cell.column.order >= *start_order
                        && cell.column.order <= *end_order
                        && cell.index >= *start_index
                        && cell.index <= *end_index
                };
                contains(&event.new) || contains(&event.old)
            }
            ScopeMatcher::Cell { id, header, index } => {
                (event.new.index == *index && column_matches(&event.new, *id, header))
                    || (event.old.index == *index && column_matches(&event.old, *id, header))
            }
        }
    }
}

fn column_matches(cell: &Cell, id: u64, header: &ColumnHeader) -> bool {
    cell.column.id == id || cell.column.header == *header
}
