use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of attendance event produced by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Checkin,
    Checkout,
}

impl EventType {
    pub fn is_checkin(self) -> bool {
        matches!(self, EventType::Checkin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Checkin => "checkin",
            EventType::Checkout => "checkout",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0:?}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkin" => Ok(EventType::Checkin),
            "checkout" => Ok(EventType::Checkout),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}
