//! Orchestration registry
//!
//! Process-wide directory of identities and call sessions. The registry is
//! owned by the worker task and mutated only from there; cross references
//! between identities, connections and sessions are plain ids into its maps.
//!
//! The implementation is split by concern:
//! - this module: directory operations and command dispatch
//! - `connection_ops`: login, disconnect and the per-frame call control
//! - `timer_ops`: timer fires, push notifications and forced termination

mod connection_ops;
mod timer_ops;

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::call_session::{CallSession, CallSessionSnapshot, LeaveOutcome};
use crate::collaborators::Collaborators;
use crate::config::SignalConfig;
use crate::connection::{ConnectionHandler, OutboundSink};
use crate::identity::{IdentitySession, IdentitySnapshot};
use crate::protocol::{OutboundFrame, ServiceStatus};
use crate::timers::TimerScheduler;
use crate::types::{CallProtocol, CallState, CallType, ConnectionId, IdentityId, RoomId};
use crate::worker::Command;

pub struct OrchestrationRegistry {
    config: SignalConfig,
    collaborators: Collaborators,
    scheduler: TimerScheduler,
    commands: mpsc::UnboundedSender<Command>,
    identities: HashMap<IdentityId, IdentitySession>,
    sessions: HashMap<RoomId, CallSession>,
    /// Connections that have not logged in yet
    pending: HashMap<ConnectionId, OutboundSink>,
    /// Logged-in connection → owning identity
    owners: HashMap<ConnectionId, IdentityId>,
}

impl OrchestrationRegistry {
    /// Create a registry whose timers and collaborator completions post to `commands`
    pub fn new(
        config: SignalConfig,
        collaborators: Collaborators,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            config,
            collaborators,
            scheduler: TimerScheduler::new(commands.clone()),
            commands,
            identities: HashMap::new(),
            sessions: HashMap::new(),
            pending: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Process one command. Failures are logged and never escape.
    pub fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Connect { connection, sink } => {
                self.connect(connection, sink);
                Ok(())
            }
            Command::Inbound { connection, frame } => {
                let event = frame.event_name();
                self.handle_inbound(&connection, frame).map_err(|e| (event, connection, e))
            }
            Command::Disconnect { connection } => {
                self.disconnect(&connection);
                Ok(())
            }
            Command::TimerFired(fired) => {
                self.on_timer_fired(fired);
                Ok(())
            }
            Command::NotificationCompleted {
                identity,
                generation,
                result,
            } => {
                self.on_notification_completed(&identity, generation, result);
                Ok(())
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            Command::IsBusy { identity, reply } => {
                let _ = reply.send(self.is_busy(&identity));
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };

        if let Err((event, connection, e)) = result {
            if e.is_protocol() {
                tracing::debug!(connection = %connection, event, error = %e, "Dropped invalid frame");
            } else {
                tracing::warn!(connection = %connection, event, error = %e, "Frame not handled");
            }
        }
    }

    pub fn identity(&self, id: &IdentityId) -> Option<&IdentitySession> {
        self.identities.get(id)
    }

    pub fn session(&self, room: &RoomId) -> Option<&CallSession> {
        self.sessions.get(room)
    }

    /// Existing identity, or a new placeholder. A given connection is attached.
    pub fn get_or_create_identity(
        &mut self,
        id: &IdentityId,
        connection: Option<ConnectionHandler>,
    ) -> &mut IdentitySession {
        if let Some(handler) = &connection {
            self.owners.insert(handler.id().clone(), id.clone());
        }
        let identity = self.identities.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(identity = %id, "Identity created");
            IdentitySession::new(id.clone())
        });
        if let Some(handler) = connection {
            identity.add_connection(handler);
        }
        identity
    }

    /// Busy means: flagged busy, its call session still exists and the last
    /// keepalive is inside the call-timeout window. A flag left behind by a
    /// client that vanished reads as not busy once the window passes.
    pub fn is_busy(&self, id: &IdentityId) -> bool {
        let Some(identity) = self.identities.get(id) else {
            return false;
        };
        if !identity.busy_flag() {
            return false;
        }
        let in_session = identity
            .room()
            .and_then(|room| self.sessions.get(room))
            .map_or(false, |session| session.is_live() && session.is_participant(id));
        if !in_session {
            return false;
        }
        identity.last_keepalive().map_or(false, |last| {
            Instant::now().saturating_duration_since(last) <= self.config.call_timeout()
        })
    }

    /// Register a new ringing session keyed by the caller.
    ///
    /// Returns `None` when a live session already involves either side.
    pub fn create_call_session(
        &mut self,
        caller: &IdentityId,
        callee: &IdentityId,
        call_type: CallType,
        protocol: CallProtocol,
    ) -> Option<RoomId> {
        let conflict = self.sessions.values().find(|session| {
            session.is_live() && (session.is_participant(caller) || session.is_participant(callee))
        });
        if let Some(existing) = conflict {
            tracing::warn!(
                caller = %caller,
                callee = %callee,
                room = %existing.id(),
                "Live call session already exists"
            );
            return None;
        }

        let session = CallSession::new(caller.clone(), callee.clone(), call_type, protocol);
        let room = session.id().clone();
        tracing::info!(room = %room, caller = %caller, callee = %callee, "Call session created");
        self.sessions.insert(room.clone(), session);
        Some(room)
    }

    /// Fan a frame to every connection of `target` except the sender's
    pub fn route_to_identity(
        &self,
        from: Option<&ConnectionId>,
        target: &IdentityId,
        frame: OutboundFrame,
    ) -> usize {
        match self.identities.get(target) {
            Some(identity) => identity.emit_except(from, frame),
            None => {
                tracing::debug!(target = %target, event = frame.event_name(), "No such identity to route to");
                0
            }
        }
    }

    pub fn delete_call_session(&mut self, room: &RoomId) -> Option<CallSession> {
        let session = self.sessions.remove(room)?;
        tracing::info!(room = %room, state = %session.state(), "Call session deleted");
        Some(session)
    }

    /// Remove `identity` from `room`; the session is deleted when it empties
    /// and a connected call is reported to call history.
    pub fn leave_room(&mut self, room: &RoomId, identity: &IdentityId) {
        let Some(session) = self.sessions.get_mut(room) else {
            return;
        };
        match session.leave(identity) {
            LeaveOutcome::NotMember | LeaveOutcome::Remaining(_) => {}
            LeaveOutcome::Empty { connected_duration } => {
                if let Some(session) = self.delete_call_session(room) {
                    if let Some(duration) = connected_duration {
                        self.log_call_event(
                            session.caller(),
                            session.callee(),
                            duration.as_millis() as u64,
                            session.call_type(),
                        );
                    }
                }
            }
        }
    }

    /// Capacity of the media collaborator as sent at login
    pub fn service_status(&self) -> ServiceStatus {
        self.collaborators.media.capacity().to_service_status()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut identities: Vec<_> = self.identities.values().map(IdentitySession::snapshot).collect();
        identities.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        let mut sessions: Vec<_> = self.sessions.values().map(CallSession::snapshot).collect();
        sessions.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

        RegistrySnapshot {
            identities,
            sessions,
            pending_connections: self.pending.len(),
            service_status: self.service_status(),
        }
    }

    /// Send one frame to a connection, logged in or not
    fn send_to(&self, connection: &ConnectionId, frame: OutboundFrame) -> bool {
        if let Some(identity) = self.owners.get(connection).and_then(|id| self.identities.get(id)) {
            return identity.emit_to(connection, frame);
        }
        self.pending
            .get(connection)
            .map_or(false, |sink| sink.send(frame).is_ok())
    }

    /// Report a call to history without waiting on it
    fn log_call_event(&self, from: &IdentityId, to: &IdentityId, duration_ms: u64, call_type: CallType) {
        let history = self.collaborators.history.clone();
        let (from, to) = (from.clone(), to.clone());
        tracing::debug!(from = %from, to = %to, duration_ms, "Logging call event");
        tokio::spawn(async move {
            if let Err(e) = history.log_call_event(&from, &to, duration_ms, call_type).await {
                tracing::warn!(from = %from, to = %to, error = %e, "Failed to log call event");
            }
        });
    }

    /// Missed calls are logged with a zero duration
    fn log_missed_call(&self, from: &IdentityId, to: &IdentityId, call_type: CallType) {
        self.log_call_event(from, to, 0, call_type);
    }

    /// Cancel any outstanding push for `target` without waiting on it
    fn cancel_push(&self, target: &IdentityId) {
        let notifications = self.collaborators.notifications.clone();
        let target = target.clone();
        tokio::spawn(async move {
            if let Err(e) = notifications.cancel_push_notification(&target).await {
                tracing::warn!(target = %target, error = %e, "Failed to cancel push notification");
            }
        });
    }

    /// Terminate `room` with `outcome`, tell both participants and delete it.
    ///
    /// Returns false when the session does not exist or is already terminal.
    fn terminate_session(&mut self, room: &RoomId, outcome: CallState) -> bool {
        let Some(session) = self.sessions.get_mut(room) else {
            return false;
        };
        let was_ringing = session.state() == CallState::Ringing;
        let changed = match outcome {
            CallState::Rejected => session.on_call_rejected(),
            CallState::TimedOut => session.on_call_timed_out(),
            _ => session.on_call_ended(),
        };
        if !changed {
            return false;
        }

        let caller = session.caller().clone();
        let callee = session.callee().clone();
        let call_type = session.call_type();

        for participant in [&caller, &callee] {
            if let Some(identity) = self.identities.get_mut(participant) {
                if identity.room() == Some(room) {
                    match outcome {
                        CallState::Rejected => identity.on_call_rejected(),
                        CallState::TimedOut => identity.on_call_timed_out(),
                        _ => identity.on_call_ended(),
                    };
                }
            }
            self.leave_room(room, participant);
            self.dispose_if_orphaned(participant);
        }
        // a session whose callee never joined may still hold no members
        self.delete_call_session(room);

        if was_ringing && matches!(outcome, CallState::Rejected | CallState::TimedOut) {
            self.log_missed_call(&caller, &callee, call_type);
        }
        self.cancel_push(&callee);
        true
    }

    /// Placeholders and dropped identities are evicted after the dispose grace
    fn dispose_if_orphaned(&mut self, id: &IdentityId) {
        if let Some(identity) = self.identities.get_mut(id) {
            if identity.connection_count() == 0 {
                identity.arm_dispose(&self.scheduler, self.config.dispose_grace());
            }
        }
    }
}

/// Read-only view of the whole registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub identities: Vec<IdentitySnapshot>,
    pub sessions: Vec<CallSessionSnapshot>,
    pub pending_connections: usize,
    pub service_status: ServiceStatus,
}

impl RegistrySnapshot {
    pub fn identity(&self, id: &str) -> Option<&IdentitySnapshot> {
        self.identities.iter().find(|identity| identity.id.as_str() == id)
    }

    pub fn session(&self, room: &str) -> Option<&CallSessionSnapshot> {
        self.sessions.iter().find(|session| session.id.as_str() == room)
    }
}
