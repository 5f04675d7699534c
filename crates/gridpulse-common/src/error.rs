//! The single error type the engine surfaces.
//!
//! Three families, mirroring how callers should react:
//! - configuration errors (`InvalidListener`) — programmer error, never retried
//! - loop errors (`ListenerLoop`) — fatal, propagated to the mutation call site
//! - lifecycle errors (`ClosedTable`, `InvalidColumn`, `UnknownTable`) —
//!   surfaced immediately, never silently dropped

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Listener metadata was read before the config closure assigned it.
    #[error("listener metadata read before configuration completed")]
    InvalidListener,

    /// A non-loop-tolerant listener re-entered itself within one dispatch
    /// pass. The offending listener is identified by name when it has one,
    /// otherwise by its registration key.
    #[error("listener loop detected: {listener}")]
    ListenerLoop { listener: String },

    /// Mutation attempted on a closed table or view.
    #[error("'{name}' is closed")]
    Closed { name: String },

    #[error("invalid column: {reason}")]
    InvalidColumn { reason: String },

    #[error("no table named '{name}'")]
    UnknownTable { name: String },
}

impl GridError {
    pub fn invalid_column(reason: impl Into<String>) -> Self {
        GridError::InvalidColumn {
            reason: reason.into(),
        }
    }

    pub fn closed(name: impl Into<String>) -> Self {
        GridError::Closed { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = GridError::closed("t1");
        assert_eq!(e.to_string(), "'t1' is closed");

        let e = GridError::ListenerLoop {
            listener: "sum-listener".into(),
        };
        assert!(e.to_string().contains("sum-listener"));
    }
}
