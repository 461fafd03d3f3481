//! Typed error handling for delivery operations.
//!
//! Three layers:
//! - [`TransportError`]: one send attempt failed; classified per message
//! - [`LockError`]: the drain lock could not be taken or released
//! - [`DeliveryError`]: a whole pass failed and the caller must hear about it

use std::time::Duration;

use mailq_spool::SpoolError;
use thiserror::Error;

/// Failure raised by a transport while sending one message.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure (connection refused, reset, unreachable).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The server answered with an error reply.
    #[error("SMTP error {code}: {message}")]
    Smtp { code: u16, message: String },

    /// The server said something we could not parse.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Anything else a transport wants to raise.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wrap an arbitrary error
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(error.into())
    }

    /// Returns `true` for network-class failures that are worth retrying.
    ///
    /// Socket errors, closed connections, timeouts and 4xx replies.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::ConnectionClosed | Self::Timeout(_) => true,
            Self::Smtp { code, .. } => *code >= 400 && *code < 500,
            Self::Protocol(_) | Self::Other(_) => false,
        }
    }
}

/// Failure to take or release the drain lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Held by someone else and no wait was requested.
    #[error("Lock already in place")]
    AlreadyLocked,

    /// Held by someone else for longer than we were willing to wait.
    #[error("Timed out after {waited:?} waiting for the lock")]
    Timeout { waited: Duration },

    #[error("Lock I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The lock file holds something we cannot interpret.
    #[error("Corrupt lock file: {0}")]
    Corrupt(String),
}

/// Pass-level delivery error.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The queue store failed; the pass was abandoned.
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(TransportError::from(refused).is_transient());
        assert!(TransportError::ConnectionClosed.is_transient());
        assert!(TransportError::Timeout("DATA".to_string()).is_transient());
        assert!(
            TransportError::Smtp {
                code: 451,
                message: "try again".to_string()
            }
            .is_transient()
        );

        assert!(
            !TransportError::Smtp {
                code: 550,
                message: "no such user".to_string()
            }
            .is_transient()
        );
        assert!(!TransportError::Protocol("garbage".to_string()).is_transient());
        assert!(!TransportError::other("boom").is_transient());
    }

    #[test]
    fn error_display() {
        let err = DeliveryError::from(LockError::AlreadyLocked);
        assert_eq!(err.to_string(), "Lock error: Lock already in place");

        let err = TransportError::Smtp {
            code: 554,
            message: "rejected".to_string(),
        };
        assert_eq!(err.to_string(), "SMTP error 554: rejected");
    }
}
