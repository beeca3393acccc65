//! Core identifiers and state enums shared by every orchestration component.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stable key of a logical end-user (not a connection)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of one live transport connection (one device or tab)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh random connection id
    pub fn generate() -> Self {
        Self(format!("conn-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Correlation key of a call session.
///
/// A room is keyed by its caller's identity, so a caller can own at most one
/// room at a time.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&IdentityId> for RoomId {
    fn from(caller: &IdentityId) -> Self {
        Self(caller.0.clone())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media kind of a call. Encoded on the wire as `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum CallType {
    #[default]
    None,
    Audio,
    Video,
}

impl CallType {
    pub fn code(self) -> i64 {
        match self {
            CallType::None => -1,
            CallType::Audio => 0,
            CallType::Video => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(CallType::None),
            0 => Some(CallType::Audio),
            1 => Some(CallType::Video),
            _ => None,
        }
    }
}

impl Serialize for CallType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for CallType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;
        let code = match &value {
            serde_json::Value::Null => return Ok(CallType::None),
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        code.and_then(CallType::from_code)
            .ok_or_else(|| D::Error::custom(format!("invalid call type: {}", value)))
    }
}

/// Media transport the call is negotiated over
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum CallProtocol {
    /// Direct peer-to-peer negotiation
    #[default]
    #[serde(rename = "peers")]
    Peers,
    /// Routed through the Selective Forwarding Unit
    #[serde(rename = "sfu")]
    Sfu,
}

/// State of a call session.
///
/// `Ringing` and `Calling` are live; every other state is absorbing.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Ringing,
    /// Accepted, media not confirmed yet
    Calling,
    Ended,
    Rejected,
    #[serde(rename = "TIMEDOUT")]
    TimedOut,
    Busy,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CallState::Ringing | CallState::Calling)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Ringing => "RINGING",
            CallState::Calling => "CALLING",
            CallState::Ended => "ENDED",
            CallState::Rejected => "REJECTED",
            CallState::TimedOut => "TIMEDOUT",
            CallState::Busy => "BUSY",
        };
        f.write_str(name)
    }
}

/// Call progress of a single identity, independent of the session state
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityCallState {
    #[default]
    Idle,
    RingingOut,
    RingingIn,
    Connecting,
    InCall,
}

/// Inputs to the per-identity state machine
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum IdentityCallEvent {
    StartOutgoing,
    ReceiveInvite,
    Accept,
    MediaReady,
    Reject,
    Timeout,
    End,
    Busy,
}

impl IdentityCallState {
    /// Next state for `event`, or `None` when the event is not valid here
    pub fn next(self, event: IdentityCallEvent) -> Option<IdentityCallState> {
        use IdentityCallEvent as E;
        use IdentityCallState as S;

        match (self, event) {
            (_, E::Reject | E::Timeout | E::End | E::Busy) => Some(S::Idle),
            (S::Idle, E::StartOutgoing) => Some(S::RingingOut),
            (S::Idle, E::ReceiveInvite) => Some(S::RingingIn),
            (S::RingingOut | S::RingingIn, E::Accept) => Some(S::Connecting),
            (S::Connecting, E::MediaReady) => Some(S::InCall),
            _ => None,
        }
    }
}
