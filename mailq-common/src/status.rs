use core::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// The outcome of attempting to send a single message
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ResultCode {
    Sent,
    Failed,
    Skipped,
    Deferred,
}

impl ResultCode {
    /// Checks if the message left the queue for good
    pub const fn is_delivered(self) -> bool {
        matches!(self, Self::Sent)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Deferred => "DEFERRED",
        }
    }
}

impl Display for ResultCode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::ResultCode;

    #[test]
    fn result_code() {
        assert!(ResultCode::Sent.is_delivered());
        assert!(!ResultCode::Deferred.is_delivered());
        assert_eq!(ResultCode::Failed.to_string(), "FAILED");
        assert_eq!(ResultCode::Skipped.as_str(), "SKIPPED");
    }
}
