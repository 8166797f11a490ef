//! Error types for faultline

use thiserror::Error;

/// Errors that can occur in the supervision core
#[derive(Debug, Error)]
pub enum FaultError {
    /// Configuration error (permission tables, schemas, module wiring)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Module not present in the registry
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    /// Module constructor failure during start/restart
    #[error("Module '{module}' failed to start: {reason}")]
    ModuleStart {
        module: String,
        reason: String,
    },

    /// Payload rejected by a registered event schema
    #[error("Schema validation failed for event '{event}': {reason}")]
    SchemaValidation {
        event: String,
        reason: String,
    },

    /// Recovery strategy execution failure
    #[error("Recovery strategy '{strategy}' for module '{module}' failed: {reason}")]
    Strategy {
        module: String,
        strategy: String,
        reason: String,
    },

    /// Recovery strategy exceeded its configured time budget
    #[error("Recovery strategy '{strategy}' for module '{module}' timed out after {timeout_ms}ms")]
    StrategyTimeout {
        module: String,
        strategy: String,
        timeout_ms: u64,
    },

    /// Event handler failure, surfaced through dispatch diagnostics
    #[error("Handler error: {0}")]
    Handler(String),

    /// Internal state lock poisoned by a panicked writer
    #[error("Internal state lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type alias for supervision operations
pub type Result<T> = std::result::Result<T, FaultError>;
