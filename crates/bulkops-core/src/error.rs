use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("failed to decode bulk action request: {source}\n  frame: {excerpt}")]
    Decode {
        /// Leading part of the offending frame.
        excerpt: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("lock '{key}' not acquired within {}s", waited.as_secs())]
    LockTimeout { key: String, waited: Duration },

    #[error("target resolution failed: {0}")]
    Resolution(String),

    #[error("task for target '{target}' failed: {reason}")]
    TaskFailed { target: String, reason: String },

    #[error("task for target '{0}' panicked")]
    TaskPanicked(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("failed to serialize frame: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deliver frame: {0}")]
    Delivery(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("system '{system}' not found in environment '{environment}'")]
    SystemNotFound { environment: String, system: String },

    #[error("unknown bulk action: {0}")]
    UnknownAction(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("report delivery failed: {0}")]
    Report(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl BulkError {
    /// Whether the error aborts a run and closes its session with an error status.
    ///
    /// Delivery and report failures are logged and skipped; everything else
    /// that reaches the engine ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BulkError::Delivery(_) | BulkError::Report(_))
    }
}

pub type Result<T> = std::result::Result<T, BulkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_and_report_errors_are_not_fatal() {
        assert!(!BulkError::Delivery("closed".into()).is_fatal());
        assert!(!BulkError::Report("smtp down".into()).is_fatal());
    }

    #[test]
    fn run_errors_are_fatal() {
        assert!(BulkError::Cancelled.is_fatal());
        assert!(BulkError::Resolution("directory down".into()).is_fatal());
        assert!(BulkError::LockTimeout {
            key: "/ws/bulk/cleanup p".into(),
            waited: Duration::from_secs(5),
        }
        .is_fatal());
        assert!(BulkError::TaskFailed {
            target: "env-1".into(),
            reason: "boom".into(),
        }
        .is_fatal());
    }

    #[test]
    fn lock_timeout_message_names_key_and_bound() {
        let err = BulkError::LockTimeout {
            key: "/ws/bulk/cleanup 42".into(),
            waited: Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "lock '/ws/bulk/cleanup 42' not acquired within 30s"
        );
    }
}
