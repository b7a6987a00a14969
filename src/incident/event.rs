//! Event-type tags reported by the collector.

use std::fmt;
use std::str::FromStr;

/// Category of a single sshd event.
///
/// Unknown tags are kept verbatim in [`EventType::Other`] so nothing the
/// collector reports is lost, but only the known variants take part in
/// severity rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    FailedLogin,
    AcceptedLogin,
    InvalidUser,
    BreakInAttempt,
    Other(String),
}

impl EventType {
    /// The four categories the dashboard filters on by default.
    pub const KNOWN: [EventType; 4] = [
        EventType::FailedLogin,
        EventType::AcceptedLogin,
        EventType::InvalidUser,
        EventType::BreakInAttempt,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            EventType::FailedLogin => "failed_login",
            EventType::AcceptedLogin => "accepted_login",
            EventType::InvalidUser => "invalid_user",
            EventType::BreakInAttempt => "break_in_attempt",
            EventType::Other(tag) => tag,
        }
    }
}

impl From<&str> for EventType {
    fn from(raw: &str) -> Self {
        let tag = raw.trim();
        match tag.to_ascii_lowercase().as_str() {
            "failed_login" | "failed" => EventType::FailedLogin,
            "accepted_login" | "accepted" | "login_success" => EventType::AcceptedLogin,
            "invalid_user" | "invalid" => EventType::InvalidUser,
            "break_in_attempt" => EventType::BreakInAttempt,
            _ => EventType::Other(tag.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(raw: String) -> Self {
        EventType::from(raw.as_str())
    }
}

impl From<EventType> for String {
    fn from(tag: EventType) -> Self {
        match tag {
            EventType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from(s))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
