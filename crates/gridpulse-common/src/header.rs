use std::fmt::{self, Display};

use smallvec::SmallVec;

/// An ordered, immutable list of string labels identifying a column.
///
/// Headers compare element-wise: a shorter header sorts before any longer
/// header sharing the same prefix. Two headers are equal iff their label
/// lists are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnHeader {
    labels: SmallVec<[String; 2]>,
}

impl ColumnHeader {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnHeader {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

impl Display for ColumnHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{label}")?;
        }
        write!(f, "]")
    }
}

impl From<&str> for ColumnHeader {
    fn from(label: &str) -> Self {
        ColumnHeader::new([label])
    }
}

impl From<String> for ColumnHeader {
    fn from(label: String) -> Self {
        ColumnHeader::new([label])
    }
}

impl<const N: usize> From<[&str; N]> for ColumnHeader {
    fn from(labels: [&str; N]) -> Self {
        ColumnHeader::new(labels)
    }
}

/// Shorthand used throughout the tests and examples: `header(["A", "B"])`.
pub fn header<H: Into<ColumnHeader>>(h: H) -> ColumnHeader {
    h.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_label_list_equality() {
        assert_eq!(ColumnHeader::from("A"), ColumnHeader::new(["A"]));
        assert_ne!(ColumnHeader::from("A"), ColumnHeader::from(["A", "B"]));
    }

    #[test]
    fn prefix_sorts_before_extension() {
        let a = ColumnHeader::from(["A"]);
        let ab = ColumnHeader::from(["A", "B"]);
        let b = ColumnHeader::from(["B"]);
        assert!(a < ab);
        assert!(ab < b);
    }

    #[test]
    fn display_joins_labels() {
        assert_eq!(ColumnHeader::from(["A", "B"]).to_string(), "[A, B]");
    }
}
