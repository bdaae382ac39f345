use thiserror::Error;

pub type WorkbenchResult<T> = Result<T, WorkbenchError>;

/// Conditions surfaced by the workbench. None of them escape the public
/// `Workbench` operations; they become status lines or error result tabs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkbenchError {
    #[error("Not connected to database")]
    NoActiveConnection,

    #[error("No SQL to execute")]
    NoQuery,

    #[error("{0}")]
    StatementExecutionFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to save script: {0}")]
    PersistenceFailed(String),

    #[error("A query is already running")]
    QueryAlreadyRunning,

    /// The session was replaced or torn down while a call was in flight.
    #[error("Session changed while the statement was running")]
    SessionChanged,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential store error: {0}")]
    Credential(String),
}
