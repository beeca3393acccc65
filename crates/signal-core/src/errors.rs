//! Error types for the signaling core
//!
//! Two layers of errors exist:
//!
//! - [`ProtocolError`]: a frame or payload that could not be parsed or that
//!   carries unusable identifiers. These are dropped and logged by the
//!   worker with no state change.
//! - [`SignalError`]: failures of an orchestration operation. Handlers return
//!   them so the worker can log them; none of them is fatal to the process.
//!
//! State conflicts that the remote peer must hear about (busy, ongoing) are
//! not errors at all: they are answered with an explicit outbound frame.

use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, SignalError>;

/// A frame or payload that failed the parse step
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame text is not a JSON envelope
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// Envelope names an event this server does not handle
    #[error("Unknown event: {event}")]
    UnknownEvent { event: String },

    /// Envelope data does not match the event's payload shape
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },

    /// A required identifier is empty
    #[error("Missing identifier: {field}")]
    MissingId { field: &'static str },
}

impl ProtocolError {
    pub fn invalid_payload(event: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidPayload {
            event: event.into(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_id(field: &'static str) -> Self {
        Self::MissingId { field }
    }
}

/// Errors raised by orchestration operations
#[derive(Debug, Error)]
pub enum SignalError {
    /// Protocol error surfaced by a handler
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No identity is registered under this key
    #[error("Identity not found: {identity}")]
    IdentityNotFound { identity: String },

    /// No connection is registered under this id
    #[error("Connection not found: {connection}")]
    ConnectionNotFound { connection: String },

    /// No call session is registered under this id
    #[error("Call session not found: {room}")]
    SessionNotFound { room: String },

    /// Operation is not valid in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// A call session already holds both participants
    #[error("Call session {room} is full")]
    SessionFull { room: String },

    /// External collaborator call failed
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The orchestration worker has stopped
    #[error("Orchestrator is not running")]
    WorkerClosed,
}

impl SignalError {
    pub fn identity_not_found(identity: impl ToString) -> Self {
        Self::IdentityNotFound {
            identity: identity.to_string(),
        }
    }

    pub fn connection_not_found(connection: impl ToString) -> Self {
        Self::ConnectionNotFound {
            connection: connection.to_string(),
        }
    }

    pub fn session_not_found(room: impl ToString) -> Self {
        Self::SessionNotFound {
            room: room.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn collaborator(collaborator: &'static str, message: impl ToString) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Protocol errors are expected noise from clients and are logged quietly
    pub fn is_protocol(&self) -> bool {
        matches!(self, SignalError::Protocol(_))
    }
}
