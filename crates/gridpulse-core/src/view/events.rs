//! View event payloads.

use std::collections::BTreeSet;

use gridpulse_common::ColumnHeader;

/// Which visual property a view event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViewKind {
    Height,
    Width,
    Classes,
    Topics,
}

/// A visual property value. `Unset` stands for "no value at this slot";
/// resolution then falls through to the broader slots.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ViewValue {
    #[default]
    Unset,
    Px(u64),
    Classes(BTreeSet<String>),
    Topics(BTreeSet<String>),
}

impl ViewValue {
    pub fn is_unset(&self) -> bool {
        matches!(self, ViewValue::Unset)
    }
}

/// Where a visual property lives. Both coordinates optional:
/// `(None, None)` table defaults, `(Some, None)` a column, `(None, Some)`
/// a row, `(Some, Some)` one cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewSlot {
    pub column: Option<ColumnHeader>,
    pub index: Option<i64>,
}

impl ViewSlot {
    pub fn table() -> Self {
        ViewSlot {
            column: None,
            index: None,
        }
    }

    pub fn column(header: impl Into<ColumnHeader>) -> Self {
        ViewSlot {
            column: Some(header.into()),
            index: None,
        }
    }

    pub fn row(index: i64) -> Self {
        ViewSlot {
            column: None,
            index: Some(index),
        }
    }

    pub fn cell(header: impl Into<ColumnHeader>, index: i64) -> Self {
        ViewSlot {
            column: Some(header.into()),
            index: Some(index),
        }
    }
}

/// One visual-property change. `version` is the view store version
/// produced by the mutation.
#[derive(Debug, Clone)]
pub struct ViewListenerEvent {
    pub slot: ViewSlot,
    pub kind: ViewKind,
    pub old: ViewValue,
    pub new: ViewValue,
    pub version: u64,
}
