//! Error types and handling
//!
//! This module provides the error types used throughout the switchboard engine.
//! All errors implement the `SwitchboardErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Failure policy
//!
//! Most failures inside a turn never reach the user as an error: planning
//! failures fall back to a single general task and worker/tool failures turn
//! into degraded textual results. The variants here surface only at the
//! edges (configuration, storage, providers) or for invariant violations.

use thiserror::Error;

/// Trait for switchboard error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait SwitchboardErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around. Non-recoverable
    /// errors indicate a bug or require manual intervention.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Storage**: Session store and knowledge store failures
/// - **LLM Provider**: API failures, timeouts, exhausted failover
/// - **Planning**: Rejected task types and malformed plans
/// - **Board**: Reducer invariant violations
/// - **Tools**: Collaborator failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, SwitchboardErrorExt};
///
/// let error = EngineError::UnknownTaskType("weather".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::ReducerConflict("duplicate completion".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    #[error("All LLM providers exhausted")]
    AllProvidersExhausted,

    #[error("LLM call timed out")]
    LLMTimeout,

    // Planning errors
    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("Planning failed: {0}")]
    PlanningFailed(String),

    // Board errors
    #[error("Reducer conflict: {0}")]
    ReducerConflict(String),

    // Worker loop errors
    #[error("Max iterations exceeded")]
    MaxIterationsExceeded,

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchboardErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::SessionStore(_) => "Conversation state could not be loaded or saved",

            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",
            Self::AllProvidersExhausted => "No LLM providers available. Check configuration",
            Self::LLMTimeout => "LLM provider took too long to respond. Try again",

            Self::UnknownTaskType(_) => "The request was routed to an unknown handler",
            Self::PlanningFailed(_) => "The request could not be broken down",

            Self::ReducerConflict(_) => "Internal state conflict. Please report this bug",

            Self::MaxIterationsExceeded => "Request too complex. Try breaking it into smaller parts",

            Self::ToolNotFound(_) => "The requested tool is not available",
            Self::ToolError(_) => "Tool operation failed",
            Self::CollaboratorUnavailable(_) => "A backing service is unavailable right now",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",
            Self::Network(_) => "Network operation failed. Check your connection",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Invariant violations and exhausted providers need intervention
            Self::ReducerConflict(_) | Self::AllProvidersExhausted => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EngineError::UnknownTaskType("weather".to_string());
        assert_eq!(error.to_string(), "Unknown task type: weather");

        let error = EngineError::ReducerConflict("task 1 completed twice".to_string());
        assert_eq!(error.to_string(), "Reducer conflict: task 1 completed twice");
    }

    #[test]
    fn test_recoverability() {
        assert!(EngineError::LLMTimeout.is_recoverable());
        assert!(EngineError::CollaboratorUnavailable("kb".into()).is_recoverable());
        assert!(!EngineError::AllProvidersExhausted.is_recoverable());
        assert!(!EngineError::ReducerConflict("x".into()).is_recoverable());
    }

    #[test]
    fn test_hints_do_not_leak_details() {
        let error = EngineError::Database("sqlite:/home/user/.switchboard/x.db".to_string());
        assert!(!error.user_hint().contains("/home/user"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: EngineError = io.into();
        assert!(matches!(error, EngineError::Io(_)));
    }
}
