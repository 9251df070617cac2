use thiserror::Error;

/// Error taxonomy for the scheduling core.
///
/// Unmet requirements are NOT errors; they are first-class result elements
/// emitted by the engine. Everything here terminates at least the current
/// call.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid config for clerkship {clerkship_id}: {}", failures.join("; "))]
    ConfigInvalid {
        clerkship_id: String,
        failures: Vec<String>,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Marker for transient store contention ("busy/locked"). Store
/// implementations attach this to their `anyhow` errors; the retry wrapper
/// recovers it by downcast and backs off. All other store errors propagate.
#[derive(Debug, Error)]
#[error("store busy: {0}")]
pub struct StoreBusy(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_invalid_message_lists_all_failures() {
        let err = CoreError::ConfigInvalid {
            clerkship_id: "c1".into(),
            failures: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a; b"), "got: {}", msg);
    }

    #[test]
    fn test_store_busy_downcast_through_anyhow() {
        let err: anyhow::Error = StoreBusy("database is locked".into()).into();
        assert!(err.downcast_ref::<StoreBusy>().is_some());
    }
}
