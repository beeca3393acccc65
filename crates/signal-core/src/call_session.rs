//! Call session ("room")
//!
//! One [`CallSession`] exists per call attempt. It owns membership and the
//! call-state machine; it never talks to connections itself. Operations
//! return the identities that must hear about a change and the registry
//! performs the fan-out.
//!
//! ```text
//! RINGING ──accept──▶ CALLING ──all members ready──▶ (connected)
//!    │                   │
//!    └───────────────────┴──▶ ENDED | REJECTED | TIMEDOUT | BUSY
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::errors::{Result, SignalError};
use crate::types::{CallProtocol, CallState, CallType, IdentityId, RoomId};

/// Maximum number of members of a one-to-one call
pub const MAX_MEMBERS: usize = 2;

/// Result of a member leaving
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The identity was not a member
    NotMember,
    /// Members are left in the session
    Remaining(usize),
    /// Membership reached zero; the session must be deleted.
    /// Carries the media duration when the call had connected.
    Empty { connected_duration: Option<Duration> },
}

/// Record of one call attempt between two identities
#[derive(Debug)]
pub struct CallSession {
    id: RoomId,
    caller: IdentityId,
    callee: IdentityId,
    /// Member → ready flag, in join order
    members: IndexMap<IdentityId, bool>,
    state: CallState,
    call_type: CallType,
    protocol: CallProtocol,
    connected: bool,
    accepted_by: Option<IdentityId>,
    created_at: DateTime<Utc>,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

impl CallSession {
    /// New ringing session with no members yet
    pub fn new(
        caller: IdentityId,
        callee: IdentityId,
        call_type: CallType,
        protocol: CallProtocol,
    ) -> Self {
        Self {
            id: RoomId::from(&caller),
            caller,
            callee,
            members: IndexMap::new(),
            state: CallState::Ringing,
            call_type,
            protocol,
            connected: false,
            accepted_by: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn caller(&self) -> &IdentityId {
        &self.caller
    }

    pub fn callee(&self) -> &IdentityId {
        &self.callee
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_member(&self, identity: &IdentityId) -> bool {
        self.members.contains_key(identity)
    }

    pub fn is_participant(&self, identity: &IdentityId) -> bool {
        *identity == self.caller || *identity == self.callee
    }

    /// The participant on the other end from `identity`
    pub fn counterpart(&self, identity: &IdentityId) -> Option<&IdentityId> {
        if *identity == self.caller {
            Some(&self.callee)
        } else if *identity == self.callee {
            Some(&self.caller)
        } else {
            None
        }
    }

    pub fn is_ready(&self, identity: &IdentityId) -> bool {
        self.members.get(identity).copied().unwrap_or(false)
    }

    /// Add a participant. Returns false when it was already a member.
    pub fn join(&mut self, identity: &IdentityId) -> Result<bool> {
        if !self.is_participant(identity) {
            return Err(SignalError::invalid_state(format!(
                "{} is not a participant of call {}",
                identity, self.id
            )));
        }
        if !self.is_live() {
            return Err(SignalError::invalid_state(format!(
                "call {} is already {}",
                self.id, self.state
            )));
        }
        if self.members.contains_key(identity) {
            return Ok(false);
        }
        if self.members.len() >= MAX_MEMBERS {
            return Err(SignalError::SessionFull {
                room: self.id.to_string(),
            });
        }
        self.members.insert(identity.clone(), false);
        tracing::debug!(room = %self.id, identity = %identity, "Member joined");
        Ok(true)
    }

    /// Remove a member
    pub fn leave(&mut self, identity: &IdentityId) -> LeaveOutcome {
        if self.members.shift_remove(identity).is_none() {
            return LeaveOutcome::NotMember;
        }
        tracing::debug!(room = %self.id, identity = %identity, "Member left");

        if !self.members.is_empty() {
            return LeaveOutcome::Remaining(self.members.len());
        }

        let now = Instant::now();
        self.ended_at.get_or_insert(now);
        let connected_duration = if self.connected {
            self.started_at.map(|start| now.saturating_duration_since(start))
        } else {
            None
        };
        LeaveOutcome::Empty { connected_duration }
    }

    /// Record acceptance by `accepting`.
    ///
    /// Returns the members to notify, or `None` when the accept is a duplicate
    /// or the call is no longer ringing.
    pub fn on_call_accepted(&mut self, accepting: &IdentityId) -> Option<Vec<IdentityId>> {
        if self.state != CallState::Ringing {
            tracing::debug!(
                room = %self.id,
                identity = %accepting,
                state = %self.state,
                "Ignoring accept, call is not ringing"
            );
            return None;
        }
        if *accepting != self.callee {
            tracing::warn!(room = %self.id, identity = %accepting, "Accept from a non-callee ignored");
            return None;
        }

        self.state = CallState::Calling;
        self.accepted_by = Some(accepting.clone());
        self.started_at = Some(Instant::now());
        tracing::info!(room = %self.id, identity = %accepting, "Call accepted");

        Some(
            self.members
                .keys()
                .filter(|member| *member != accepting)
                .cloned()
                .collect(),
        )
    }

    /// Mark `member` as media-ready.
    ///
    /// Returns every member exactly once: on the call that makes all current
    /// members ready. The session is then connected and call duration starts.
    pub fn on_member_call_ready(&mut self, member: &IdentityId) -> Option<Vec<IdentityId>> {
        if self.state != CallState::Calling {
            tracing::debug!(room = %self.id, identity = %member, state = %self.state, "Ready ignored");
            return None;
        }
        match self.members.get_mut(member) {
            Some(ready) => *ready = true,
            None => {
                tracing::debug!(room = %self.id, identity = %member, "Ready from a non-member ignored");
                return None;
            }
        }
        if self.connected || self.members.len() < MAX_MEMBERS || !self.members.values().all(|r| *r) {
            return None;
        }

        self.connected = true;
        self.started_at = Some(Instant::now());
        tracing::info!(room = %self.id, "All members ready, media connected");
        Some(self.members.keys().cloned().collect())
    }

    pub fn on_call_rejected(&mut self) -> bool {
        self.terminate(CallState::Rejected)
    }

    pub fn on_call_timed_out(&mut self) -> bool {
        self.terminate(CallState::TimedOut)
    }

    pub fn on_call_ended(&mut self) -> bool {
        self.terminate(CallState::Ended)
    }

    /// Move into an absorbing state. Returns false if already terminal.
    fn terminate(&mut self, state: CallState) -> bool {
        debug_assert!(state.is_terminal());
        if !self.is_live() {
            return false;
        }
        tracing::info!(room = %self.id, from = %self.state, to = %state, "Call terminated");
        self.state = state;
        self.ended_at = Some(Instant::now());
        true
    }

    pub fn snapshot(&self) -> CallSessionSnapshot {
        CallSessionSnapshot {
            id: self.id.clone(),
            caller: self.caller.clone(),
            callee: self.callee.clone(),
            members: self.members.keys().cloned().collect(),
            ready: self
                .members
                .iter()
                .filter(|(_, ready)| **ready)
                .map(|(id, _)| id.clone())
                .collect(),
            state: self.state,
            call_type: self.call_type,
            protocol: self.protocol,
            connected: self.connected,
            accepted_by: self.accepted_by.clone(),
            created_at: self.created_at,
        }
    }
}

/// Read-only view of a call session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSessionSnapshot {
    pub id: RoomId,
    pub caller: IdentityId,
    pub callee: IdentityId,
    pub members: Vec<IdentityId>,
    pub ready: Vec<IdentityId>,
    pub state: CallState,
    pub call_type: CallType,
    pub protocol: CallProtocol,
    pub connected: bool,
    pub accepted_by: Option<IdentityId>,
    pub created_at: DateTime<Utc>,
}
