//! Error types for chainlens operations
//!
//! Most failure modes in this crate are deliberately *not* errors: an
//! unclassifiable stage degrades to an `unknown` node, a missing pricing
//! entry yields a flagged zero-cost contribution, and a runtime event for an
//! uninspected stage synthesizes an ad-hoc node. The variants below cover the
//! few conditions that genuinely cannot be recovered into a report.

use thiserror::Error;

/// Result type alias for chainlens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by debug sessions and report export.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A report was requested but the session never recorded a single event.
    ///
    /// This is the only hard failure of the session façade: it means the
    /// traced execution was never started (or the observer was never
    /// installed), so there is nothing to analyze.
    #[error("debug session {session_id} recorded no events; was the pipeline executed with the session's observer?")]
    EmptySession {
        /// Identifier of the offending session
        session_id: uuid::Uuid,
    },

    /// A report was requested before any execution was traced.
    #[error("no traced execution yet; call trace() before report()")]
    NotTraced,

    /// Serializing an export artifact failed.
    #[error("failed to serialize export: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_session_message_names_session() {
        let id = uuid::Uuid::new_v4();
        let err = Error::EmptySession { session_id: id };
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("no events"));
    }

    #[test]
    fn test_serialization_error_wraps_serde() {
        let bad = serde_json::from_str::<serde_json::Value>("{");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
