use std::{io, sync::PoisonError};

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

use crate::QueuedMessageId;

/// Failure of a queue store operation
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Spool I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// No queue entry (or failed record) has this id
    #[error("Queue entry {0} not found")]
    NotFound(QueuedMessageId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Poisoned state, capacity exhausted and similar
    #[error("Queue store failure: {0}")]
    Internal(String),

    #[error("Queue entry {0} already exists")]
    AlreadyExists(QueuedMessageId),
}

/// A spool record could not be written or read back
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Unable to encode spool record: {0}")]
    Encode(#[from] EncodeError),

    #[error("Unable to decode spool record: {0}")]
    Decode(#[from] DecodeError),

    #[error("Spool record is corrupt: {0}")]
    Corrupted(String),
}

/// The spool location is unusable
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Spool path {0} exists but is not a directory")]
    NotDirectory(String),

    #[error("Invalid spool configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<PoisonError<T>> for SpoolError {
    fn from(_: PoisonError<T>) -> Self {
        Self::Internal(String::from("queue state poisoned by a panicked writer"))
    }
}

impl From<EncodeError> for SpoolError {
    fn from(e: EncodeError) -> Self {
        Self::Serialization(SerializationError::Encode(e))
    }
}

impl From<DecodeError> for SpoolError {
    fn from(e: DecodeError) -> Self {
        Self::Serialization(SerializationError::Decode(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_cause() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = SpoolError::from(denied);

        assert!(matches!(err, SpoolError::Io(_)));
        assert_eq!(err.to_string(), "Spool I/O failed: access denied");
    }

    #[test]
    fn ids_are_named() {
        let id = QueuedMessageId::generate();
        assert_eq!(
            SpoolError::NotFound(id).to_string(),
            format!("Queue entry {id} not found")
        );

        let invalid: SpoolError = ValidationError::NotDirectory("/srv/spool".to_string()).into();
        assert_eq!(
            invalid.to_string(),
            "Spool path /srv/spool exists but is not a directory"
        );
    }
}
