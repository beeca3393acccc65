//! # callwire signal core
//!
//! Call signaling and session orchestration for one-to-one audio/video
//! calls. The crate decides who may call whom, tracks presence across several
//! connections per identity, drives every call through its state machine and
//! enforces call timeouts, keepalive and reconnect grace periods.
//!
//! Media transport, push notifications and call history are collaborators
//! behind traits (see [`collaborators`]); the raw transport is whatever feeds
//! an [`OrchestratorHandle`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use callwire_signal_core::{Collaborators, ConnectionId, Orchestrator, SignalConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (handle, _worker) = Orchestrator::spawn(SignalConfig::default(), Collaborators::default())?;
//!
//!     let (sink, mut frames) = tokio::sync::mpsc::unbounded_channel();
//!     let connection = ConnectionId::generate();
//!     handle.connect(connection.clone(), sink)?;
//!     handle.inbound_text(&connection, r#"{"event":"callserver:user_login","data":"alice"}"#)?;
//!
//!     while let Some(frame) = frames.recv().await {
//!         println!("{}", frame.encode());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`OrchestrationRegistry`]: directory of identities and call sessions
//! - [`IdentitySession`]: presence, connections and call reference of one identity
//! - [`CallSession`]: membership and state of one call attempt
//! - [`ConnectionHandler`]: one live connection of an identity
//!
//! A single worker task owns the registry and applies frames, timer fires and
//! collaborator completions one at a time, so no locks guard call state.

pub mod call_session;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod errors;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod timers;
pub mod types;
pub mod worker;

pub use call_session::{CallSession, CallSessionSnapshot, LeaveOutcome};
pub use collaborators::{
    CallHistory, Collaborators, MediaCapacity, MediaService, NoopCallHistory, NoopNotificationService,
    NotificationAck, NotificationService, StaticMediaService,
};
pub use config::SignalConfig;
pub use connection::{ConnectionHandler, OutboundSink};
pub use errors::{ProtocolError, Result, SignalError};
pub use identity::{IdentitySession, IdentitySnapshot};
pub use protocol::{names, CallPayload, InboundFrame, MediaDevicesStatus, OutboundFrame, ServiceStatus};
pub use registry::{OrchestrationRegistry, RegistrySnapshot};
pub use types::{
    CallProtocol, CallState, CallType, ConnectionId, IdentityCallEvent, IdentityCallState, IdentityId, RoomId,
};
pub use worker::{Command, Orchestrator, OrchestratorHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
