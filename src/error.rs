//! Error types for speechflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeechflowError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    // Audio errors
    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("Audio encoding failed: {message}")]
    AudioEncode { message: String },

    #[error("Audio decoding failed: {message}")]
    AudioDecode { message: String },

    #[error("Unsupported output format: {format}")]
    UnsupportedOutputFormat { format: String },

    // Reassembly queue errors
    #[error("Unknown ticket #{sequence}")]
    UnknownTicket { sequence: u64 },

    #[error("Ticket #{sequence} was already resolved")]
    TicketAlreadyResolved { sequence: u64 },

    // Asynchronous operation errors
    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    OperationTimeout { operation: String, timeout_ms: u64 },

    #[error("Operation {operation} panicked: {message}")]
    OperationPanicked { operation: String, message: String },

    // Pipeline errors
    #[error("Pipeline closed: {message}")]
    PipelineClosed { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SpeechflowError>;
