//! Error types for procbatch

use thiserror::Error;

/// Core error type for batch construction and execution
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No mapping of program {program} matches target {target}")]
    MappingNotFound { program: String, target: String },

    #[error("Dependency wiring error: {0}")]
    Wiring(#[from] WiringError),

    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Invalid operation: {member} was called on a closed reader")]
    ReaderClosed { member: &'static str },

    #[error("Invalid operation: {member} was called after the reader finished")]
    ReaderFinished { member: &'static str },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("A result has already been set for target ordinal {ordinal}")]
    SlotAlreadySet { ordinal: usize },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl BatchError {
    /// Whether this error is the cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BatchError::Cancelled)
    }
}

/// Errors in the output-token wiring between commands of one batch.
///
/// These are raised while the batch text is being assembled, before any SQL
/// reaches the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    #[error("output token {token} is produced by both command {first} and command {second}")]
    DuplicateProducer {
        token: usize,
        first: usize,
        second: usize,
    },

    #[error(
        "parameter {parameter} of command {command} consumes output token {token}, which no earlier command produces"
    )]
    MissingProducer {
        token: usize,
        command: usize,
        parameter: String,
    },

    #[error("output token {token} was not declared by this batch")]
    UnknownToken { token: usize },
}

/// Result type alias for procbatch operations
pub type Result<T> = std::result::Result<T, BatchError>;
