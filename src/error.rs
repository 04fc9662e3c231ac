use std::time::Duration;

/// Error enum covering the orchestrator's failure categories.
///
/// Categories:
/// - Validation: bad inputs, rejected before any work starts
/// - Io: filesystem and JSON failures, reported per operation
/// - Subprocess: non-zero exit or missing binary
/// - Timeout: wall-clock expiry on a subprocess, non-fatal
/// - Gating: critical review findings blocking progression (carried in
///   results rather than raised, but representable for uniform reporting)
#[derive(Debug, thiserror::Error)]
pub enum OrchError {
    #[error("Validation failed at {stage}: {message}")]
    Validation { stage: String, message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("JSON error in {path}: {message}")]
    Json { path: String, message: String },

    #[error("Subprocess `{program}` failed: {message}")]
    Subprocess { program: String, message: String },

    #[error("Subprocess `{program}` not found on PATH")]
    BinaryMissing { program: String },

    #[error("Subprocess `{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("Checkpoint plan hash mismatch: {message}")]
    PlanHashMismatch { message: String },

    #[error("Critical findings block progression: {count} critical")]
    CriticalGating { count: usize },
}

impl OrchError {
    pub fn validation(stage: &str, message: impl Into<String>) -> Self {
        OrchError::Validation {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    pub fn io(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        OrchError::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    pub fn json(path: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        OrchError::Json {
            path: path.to_string(),
            message: err.to_string(),
        }
    }

    /// The `failed_at` stage label for result reporting, when one applies.
    pub fn failed_at(&self) -> Option<&str> {
        match self {
            OrchError::Validation { stage, .. } => Some(stage.as_str()),
            _ => None,
        }
    }

    /// Returns true if the error is transient and the outer loop may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchError::Timeout { .. } | OrchError::Subprocess { .. }
        )
    }

    /// Returns true if the error is unrecoverable and the pipeline should halt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchError::Validation { .. } | OrchError::PlanHashMismatch { .. }
        )
    }
}

/// Bridge for `?` in code that uses `Result<T, String>` at module seams.
impl From<OrchError> for String {
    fn from(err: OrchError) -> String {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_carries_stage_label() {
        let err = OrchError::validation("validate_inputs", "empty project path");
        assert_eq!(err.failed_at(), Some("validate_inputs"));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn timeout_is_retryable_not_fatal() {
        let err = OrchError::Timeout {
            program: "claude".to_string(),
            timeout: Duration::from_secs(3600),
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.failed_at(), None);
    }

    #[test]
    fn string_bridge_preserves_display() {
        let err = OrchError::PlanHashMismatch {
            message: "plan changed on disk".to_string(),
        };
        let s: String = err.into();
        assert!(s.contains("hash mismatch"));
    }
}
