//! Error types for ledger, promotion and skill update operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type for library operations
pub type Result<T> = std::result::Result<T, ReflectError>;

/// Error taxonomy shared by every component
#[derive(Debug, Error)]
pub enum ReflectError {
    /// Malformed transcript entry or front matter
    #[error("Parse error in {source_name}: {message}")]
    Parse { source_name: String, message: String },

    /// Post-write structural check failed; the backup has been restored
    #[error("Validation failed for {}: {message}", path.display())]
    Validation { path: PathBuf, message: String },

    #[error("Learning not found: {fingerprint}")]
    NotFound { fingerprint: String },

    #[error("Learning {fingerprint} is not eligible for promotion: {reason}")]
    NotEligible { fingerprint: String, reason: String },

    #[error("Learning {fingerprint} is already promoted")]
    AlreadyPromoted { fingerprint: String },

    #[error("Fingerprint prefix '{prefix}' matches more than one learning")]
    Ambiguous { prefix: String },

    /// Ledger unreadable or unwritable
    #[error("Ledger store error: {0}")]
    StoreIo(#[from] rusqlite::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReflectError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReflectError::Io { path: path.into(), source }
    }

    pub fn parse(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        ReflectError::Parse { source_name: source_name.into(), message: message.into() }
    }

    pub fn validation(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ReflectError::Validation { path: path.into(), message: message.into() }
    }

    /// Precondition violations that batch operations report and move past
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ReflectError::NotEligible { .. }
                | ReflectError::AlreadyPromoted { .. }
                | ReflectError::NotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_fingerprint() {
        let err = ReflectError::AlreadyPromoted { fingerprint: "abcd1234".into() };
        assert!(err.to_string().contains("abcd1234"));
        assert!(err.is_precondition());

        let err = ReflectError::validation("/tmp/SKILL.md", "missing name");
        assert!(err.to_string().contains("/tmp/SKILL.md"));
        assert!(!err.is_precondition());
    }
}
