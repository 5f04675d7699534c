use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use bigdecimal::BigDecimal;
use num_bigint::BigInt;

/// Opaque markup payload for a web cell. The engine never interprets the
/// content; rendering lives outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WebContent(pub String);

impl WebContent {
    pub fn new(content: impl Into<String>) -> Self {
        WebContent(content.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WebContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The value stored in a single cell.
///
/// `Unit` is the absent/empty value: clearing a cell writes `Unit`, and
/// history replay pairs every live cell with a synthetic `Unit` old side.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Unit,
    Text(String),
    Int(i64),
    Float(f64),
    BigInt(BigInt),
    BigDecimal(BigDecimal),
    Web(WebContent),
}

impl CellValue {
    pub fn is_unit(&self) -> bool {
        matches!(self, CellValue::Unit)
    }
}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            CellValue::Unit => state.write_u8(0),
            CellValue::Text(s) => s.hash(state),
            CellValue::Int(i) => i.hash(state),
            CellValue::Float(n) => n.to_bits().hash(state),
            CellValue::BigInt(i) => i.hash(state),
            CellValue::BigDecimal(d) => d.hash(state),
            CellValue::Web(w) => w.hash(state),
        }
    }
}

impl Eq for CellValue {}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Unit => Ok(()),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Int(i) => write!(f, "{i}"),
            CellValue::Float(n) => write!(f, "{n}"),
            CellValue::BigInt(i) => write!(f, "{i}"),
            CellValue::BigDecimal(d) => write!(f, "{d}"),
            CellValue::Web(w) => write!(f, "{w}"),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Unit
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v as i64)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<BigInt> for CellValue {
    fn from(v: BigInt) -> Self {
        CellValue::BigInt(v)
    }
}

impl From<BigDecimal> for CellValue {
    fn from(v: BigDecimal) -> Self {
        CellValue::BigDecimal(v)
    }
}

impl From<WebContent> for CellValue {
    fn from(v: WebContent) -> Self {
        CellValue::Web(v)
    }
}
