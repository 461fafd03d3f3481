use mailq_common::ResultCode;

use crate::error::TransportError;

/// What to do with a message whose send raised a non-network error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Give up: the entry becomes a failed record
    Fail,
    /// Try again later with backoff
    Defer,
    /// Leave the entry exactly as it is
    Skip,
}

impl Classification {
    pub const fn result_code(self) -> ResultCode {
        match self {
            Self::Fail => ResultCode::Failed,
            Self::Defer => ResultCode::Deferred,
            Self::Skip => ResultCode::Skipped,
        }
    }
}

/// Hook deciding the fate of messages that failed with a non-network error
///
/// It receives the error exactly as the transport raised it, so it can
/// match on the variant or downcast [`TransportError::Other`]. Its answer
/// is final.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &TransportError) -> Classification;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&TransportError) -> Classification + Send + Sync,
{
    fn classify(&self, error: &TransportError) -> Classification {
        self(error)
    }
}
