use std::{fmt, sync::Arc, time::SystemTime};

use serde::{Deserialize, Serialize};

/// An encoded message, as it was handed to the queue.
///
/// The body is already encoded for the wire; nothing in the delivery path
/// looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Envelope sender
    pub from: String,
    /// Envelope recipients
    pub to: Vec<String>,
    /// Subject line, kept alongside the body for logging
    pub subject: String,
    /// The raw, encoded message
    pub body: Arc<[u8]>,
    /// When the message was created
    pub created_at: SystemTime,
}

impl Message {
    /// Create a new message, stamped with the current wall-clock time
    pub fn new(
        from: impl Into<String>,
        to: impl IntoIterator<Item = impl Into<String>>,
        subject: impl Into<String>,
        body: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
            subject: subject.into(),
            body: body.into(),
            created_at: SystemTime::now(),
        }
    }

    /// Replace the creation timestamp
    #[must_use]
    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = created_at;
        self
    }

    /// All recipients joined for display
    pub fn recipients(&self) -> String {
        self.to.join(", ")
    }
}

/// Queue ordering key. Larger values are sent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const HIGH: Self = Self(3);
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::LOW => f.write_str("low"),
            Self::MEDIUM => f.write_str("medium"),
            Self::HIGH => f.write_str("high"),
            Self(other) => write!(f, "{other}"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "medium" | "normal" => Ok(Self::MEDIUM),
            "high" => Ok(Self::HIGH),
            other => other
                .parse::<u8>()
                .map(Self)
                .map_err(|_| format!("Unknown priority '{s}'")),
        }
    }
}
