use thiserror::Error;

pub type LoadResult<T> = Result<T, LoadError>;

/// Failures that end a load attempt. Row-level problems never appear here:
/// bad numerics are coerced and rows without an ad name are skipped.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Corrupt data: {malformed} of {total} rows malformed (limit {max_rate:.0}%)")]
    CorruptData {
        malformed: usize,
        total: usize,
        max_rate: f64,
    },

    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Load cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// What the presentation layer should offer the user after a failed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Source unreachable: let the user upload the CSV by hand.
    ManualUpload,
    /// Transient failure: offer a retry button.
    Retry,
    /// The source itself looks broken.
    CheckSource,
    /// User-initiated; nothing to surface.
    None,
}

impl LoadError {
    /// Retryable at the transport level (another attempt may succeed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LoadError::Network { .. } | LoadError::Timeout(_) | LoadError::Transport(_) | LoadError::Io(_)
        )
    }

    pub fn user_action(&self) -> RecoveryAction {
        match self {
            LoadError::Network { .. } | LoadError::Transport(_) => RecoveryAction::ManualUpload,
            LoadError::Timeout(_) | LoadError::Io(_) | LoadError::Internal(_) => RecoveryAction::Retry,
            LoadError::Parse(_) | LoadError::CorruptData { .. } | LoadError::Serialization(_) => {
                RecoveryAction::CheckSource
            }
            LoadError::Cancelled => RecoveryAction::None,
        }
    }
}

/// Errors from decoding a shareable query string.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid percent-encoding in parameter `{0}`")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_actions() {
        let err = LoadError::Network {
            attempts: 3,
            message: "connection refused".to_string(),
        };
        assert!(err.is_transient());
        assert_eq!(err.user_action(), RecoveryAction::ManualUpload);

        let err = LoadError::CorruptData {
            malformed: 20,
            total: 100,
            max_rate: 10.0,
        };
        assert!(!err.is_transient());
        assert_eq!(err.user_action(), RecoveryAction::CheckSource);
        assert!(err.to_string().contains("20 of 100"));

        assert_eq!(LoadError::Cancelled.user_action(), RecoveryAction::None);
    }
}
