//! Error types for aqueduct

use thiserror::Error;

/// Result type alias for aqueduct operations
pub type Result<T> = std::result::Result<T, AqueductError>;

/// Unified error type for all aqueduct operations
#[derive(Error, Debug, Clone)]
pub enum AqueductError {
    /// Malformed stage or option parameters, detected locally before
    /// anything is sent to the server
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A pipeline was finalized with zero stages
    #[error("Empty pipeline: at least one stage is required")]
    EmptyPipeline,

    /// Server-reported fault while executing a pipeline, carrying the
    /// server's diagnostic payload
    #[error("Pipeline execution failed: {message}")]
    PipelineExecution {
        /// Server error code, when the server supplied one
        code: Option<i32>,
        message: String,
    },

    /// Network or connectivity fault surfaced by the transport, opaque to
    /// this crate
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl AqueductError {
    /// Returns true if this error was detected locally, without a server
    /// round trip
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AqueductError::InvalidArgument(_)
                | AqueductError::EmptyPipeline
                | AqueductError::Serialization(_)
                | AqueductError::Deserialization(_)
        )
    }

    /// Returns true if this error originated server-side
    pub fn is_server_fault(&self) -> bool {
        matches!(self, AqueductError::PipelineExecution { .. })
    }
}

impl From<serde_json::Error> for AqueductError {
    fn from(err: serde_json::Error) -> Self {
        AqueductError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for AqueductError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;
        match err.kind.as_ref() {
            ErrorKind::Command(command) => AqueductError::PipelineExecution {
                code: Some(command.code),
                message: command.message.clone(),
            },
            ErrorKind::ServerSelection { message, .. } => {
                AqueductError::Connection(message.clone())
            }
            ErrorKind::Io(_) => AqueductError::Connection(err.to_string()),
            _ => AqueductError::Transport(err.to_string()),
        }
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for AqueductError {
    fn from(err: bson::ser::Error) -> Self {
        AqueductError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for AqueductError {
    fn from(err: bson::de::Error) -> Self {
        AqueductError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}
