//! Identity sessions
//!
//! One [`IdentitySession`] exists per known user identity. It owns the
//! identity's live connections, its presence and busy flags, and a reference
//! to the call it is part of. Identities are created on first login or when
//! first called (a placeholder without connections) and evicted after the
//! dispose grace period with no connections.
//!
//! Call-scoped fields are reset idempotently: every terminal path funnels
//! through [`IdentitySession::reset_call_info`], so a reset that arrives
//! twice (from two devices, or from a timer that raced an explicit end) is
//! harmless.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::connection::ConnectionHandler;
use crate::protocol::{CallPayload, OutboundFrame};
use crate::timers::{take_if_current, TimerHandle, TimerKind, TimerScheduler};
use crate::types::{
    CallType, ConnectionId, IdentityCallEvent, IdentityCallState, IdentityId, RoomId,
};

#[derive(Debug)]
pub struct IdentitySession {
    id: IdentityId,
    online: bool,
    busy: bool,
    room: Option<RoomId>,
    /// The single connection allowed to drive call control
    active_connection: Option<ConnectionId>,
    call_type: CallType,
    call_state: IdentityCallState,
    last_keepalive: Option<Instant>,
    /// Invite waiting for an answer, re-sent to devices that log in late
    incoming_call: Option<CallPayload>,
    connections: IndexMap<ConnectionId, ConnectionHandler>,
    call_timer: Option<TimerHandle>,
    notification_timer: Option<TimerHandle>,
    disconnect_timer: Option<TimerHandle>,
    dispose_timer: Option<TimerHandle>,
    created_at: DateTime<Utc>,
}

impl IdentitySession {
    pub fn new(id: IdentityId) -> Self {
        Self {
            id,
            online: false,
            busy: false,
            room: None,
            active_connection: None,
            call_type: CallType::None,
            call_state: IdentityCallState::Idle,
            last_keepalive: None,
            incoming_call: None,
            connections: IndexMap::new(),
            call_timer: None,
            notification_timer: None,
            disconnect_timer: None,
            dispose_timer: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &IdentityId {
        &self.id
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Raw busy flag. Use the registry's `is_busy` for the staleness-aware check.
    pub fn busy_flag(&self) -> bool {
        self.busy
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn active_connection(&self) -> Option<&ConnectionId> {
        self.active_connection.as_ref()
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn call_state(&self) -> IdentityCallState {
        self.call_state
    }

    pub fn last_keepalive(&self) -> Option<Instant> {
        self.last_keepalive
    }

    pub fn incoming_call(&self) -> Option<&CallPayload> {
        self.incoming_call.as_ref()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_mut(&mut self, connection: &ConnectionId) -> Option<&mut ConnectionHandler> {
        self.connections.get_mut(connection)
    }

    pub fn has_call_timer(&self) -> bool {
        self.call_timer.is_some()
    }

    pub fn has_disconnect_timer(&self) -> bool {
        self.disconnect_timer.is_some()
    }

    pub fn has_dispose_timer(&self) -> bool {
        self.dispose_timer.is_some()
    }

    /// True when the authoritative connection is set and still attached
    pub fn has_live_active_connection(&self) -> bool {
        self.active_connection
            .as_ref()
            .map_or(false, |active| self.connections.contains_key(active))
    }

    /// Whether `connection` may drive the call. Any device may while no
    /// authoritative connection is live.
    pub fn may_control_call(&self, connection: &ConnectionId) -> bool {
        !self.has_live_active_connection() || self.active_connection() == Some(connection)
    }

    // ---- connections ----

    /// Attach a connection. Idempotent by connection id; cancels a pending dispose.
    pub fn add_connection(&mut self, handler: ConnectionHandler) -> bool {
        self.dispose_timer = None;
        self.online = true;
        if self.connections.contains_key(handler.id()) {
            tracing::debug!(identity = %self.id, connection = %handler.id(), "Connection already attached");
            return false;
        }
        tracing::debug!(identity = %self.id, connection = %handler.id(), "Connection attached");
        self.connections.insert(handler.id().clone(), handler);
        true
    }

    /// Detach a connection.
    ///
    /// Losing the authoritative connection during a call arms the disconnect
    /// grace timer. Losing the last connection arms the dispose grace timer.
    pub fn remove_connection(
        &mut self,
        connection: &ConnectionId,
        scheduler: &TimerScheduler,
        disconnect_grace: Duration,
        dispose_grace: Duration,
    ) -> Option<ConnectionHandler> {
        let handler = self.connections.shift_remove(connection)?;
        tracing::debug!(identity = %self.id, connection = %connection, "Connection detached");

        if self.active_connection.as_ref() == Some(connection) {
            self.active_connection = None;
            if self.busy {
                tracing::info!(
                    identity = %self.id,
                    grace_ms = disconnect_grace.as_millis() as u64,
                    "Authoritative connection lost during call"
                );
                self.disconnect_timer =
                    Some(scheduler.schedule(&self.id, TimerKind::DisconnectGrace, disconnect_grace));
            }
        }

        if self.connections.is_empty() {
            self.online = false;
            self.arm_dispose(scheduler, dispose_grace);
        }
        Some(handler)
    }

    /// Arm the dispose timer unless it is already running
    pub fn arm_dispose(&mut self, scheduler: &TimerScheduler, after: Duration) {
        if self.dispose_timer.is_none() {
            self.dispose_timer = Some(scheduler.schedule(&self.id, TimerKind::DisposeGrace, after));
        }
    }

    /// A login while the disconnect grace timer runs takes over the call
    pub fn reconnect(&mut self, connection: &ConnectionId) -> bool {
        if self.disconnect_timer.take().is_none() || !self.busy {
            return false;
        }
        self.active_connection = Some(connection.clone());
        self.emit_to(connection, OutboundFrame::CallReconnected);
        tracing::info!(identity = %self.id, connection = %connection, "Reconnected to ongoing call");
        true
    }

    // ---- fan-out ----

    /// Send to the authoritative connection when one is set, otherwise to all
    pub fn emit(&self, frame: OutboundFrame) -> usize {
        match self.active_connection.as_ref().and_then(|id| self.connections.get(id)) {
            Some(handler) => usize::from(handler.send(frame)),
            None => self.emit_all(frame),
        }
    }

    pub fn emit_all(&self, frame: OutboundFrame) -> usize {
        self.connections
            .values()
            .filter(|handler| handler.send(frame.clone()))
            .count()
    }

    pub fn emit_to(&self, connection: &ConnectionId, frame: OutboundFrame) -> bool {
        self.connections
            .get(connection)
            .map_or(false, |handler| handler.send(frame))
    }

    /// Send to every connection except `excluded`
    pub fn emit_except(&self, excluded: Option<&ConnectionId>, frame: OutboundFrame) -> usize {
        self.connections
            .values()
            .filter(|handler| Some(handler.id()) != excluded)
            .filter(|handler| handler.send(frame.clone()))
            .count()
    }

    // ---- call state ----

    /// Apply a state-machine event; invalid events are logged and ignored
    pub fn transition(&mut self, event: IdentityCallEvent) -> bool {
        match self.call_state.next(event) {
            Some(next) => {
                if next != self.call_state {
                    tracing::trace!(identity = %self.id, from = ?self.call_state, to = ?next, "Call state");
                }
                self.call_state = next;
                true
            }
            None => {
                tracing::debug!(
                    identity = %self.id,
                    state = ?self.call_state,
                    event = ?event,
                    "Ignoring call event in current state"
                );
                false
            }
        }
    }

    pub fn refresh_keepalive(&mut self) {
        self.last_keepalive = Some(Instant::now());
    }

    /// Become the caller of `room`, driven from `connection`
    pub fn begin_outgoing(&mut self, room: RoomId, connection: ConnectionId, call_type: CallType) {
        self.busy = true;
        self.room = Some(room);
        self.active_connection = Some(connection);
        self.call_type = call_type;
        self.incoming_call = None;
        self.disconnect_timer = None;
        self.refresh_keepalive();
        self.transition(IdentityCallEvent::StartOutgoing);
    }

    /// Become the callee of `room`
    pub fn receive_invite(&mut self, room: RoomId, payload: CallPayload) {
        self.busy = true;
        self.room = Some(room);
        self.active_connection = None;
        self.call_type = payload.call_type;
        self.incoming_call = Some(payload);
        self.disconnect_timer = None;
        self.refresh_keepalive();
        self.transition(IdentityCallEvent::ReceiveInvite);
    }

    /// Arm the call timeout. A second call while armed does nothing.
    pub fn start_call_timer(&mut self, scheduler: &TimerScheduler, after: Duration) -> bool {
        if self.call_timer.is_some() {
            return false;
        }
        self.call_timer = Some(scheduler.schedule(&self.id, TimerKind::CallTimeout, after));
        true
    }

    /// Arm the push confirmation wait; returns its generation
    pub fn arm_notification_timer(&mut self, scheduler: &TimerScheduler, after: Duration) -> u64 {
        let handle = scheduler.schedule(&self.id, TimerKind::NotificationConfirm, after);
        let generation = handle.generation();
        self.notification_timer = Some(handle);
        generation
    }

    /// Push acknowledged; true if it matched the pending confirmation
    pub fn confirm_notification(&mut self, generation: u64) -> bool {
        take_if_current(&mut self.notification_timer, generation)
    }

    /// The other side accepted. Cancels the call timer; returns whether it was armed.
    pub fn on_call_accepted(&mut self) -> bool {
        let cancelled = self.call_timer.take().is_some();
        self.notification_timer = None;
        self.emit(OutboundFrame::CallAccepted);
        self.transition(IdentityCallEvent::Accept);
        cancelled
    }

    /// This identity accepted from `connection`, which becomes authoritative.
    /// Its other devices stop ringing.
    pub fn mark_accepting(&mut self, connection: &ConnectionId) {
        self.active_connection = Some(connection.clone());
        self.incoming_call = None;
        self.refresh_keepalive();
        self.transition(IdentityCallEvent::Accept);
        self.emit_except(Some(connection), OutboundFrame::CallOngoing);
    }

    pub fn on_call_ready(&mut self) {
        self.emit(OutboundFrame::CallWebrtcReady);
        self.transition(IdentityCallEvent::MediaReady);
    }

    pub fn on_call_rejected(&mut self) -> Option<RoomId> {
        self.finish(OutboundFrame::CallRejected, IdentityCallEvent::Reject)
    }

    pub fn on_call_timed_out(&mut self) -> Option<RoomId> {
        self.finish(OutboundFrame::CallTimedOut, IdentityCallEvent::Timeout)
    }

    pub fn on_call_ended(&mut self) -> Option<RoomId> {
        self.finish(OutboundFrame::CallEnded, IdentityCallEvent::End)
    }

    /// Leave the call with a terminal frame; returns the room it was in
    fn finish(&mut self, frame: OutboundFrame, event: IdentityCallEvent) -> Option<RoomId> {
        if !self.busy && self.room.is_none() {
            return None;
        }
        self.emit(frame);
        self.transition(event);
        let room = self.room.clone();
        self.reset_call_info();
        room
    }

    /// Return every call-scoped field to its initial value
    pub fn reset_call_info(&mut self) {
        self.busy = false;
        self.room = None;
        self.active_connection = None;
        self.call_type = CallType::None;
        self.call_state = IdentityCallState::Idle;
        self.last_keepalive = None;
        self.incoming_call = None;
        self.call_timer = None;
        self.notification_timer = None;
        self.disconnect_timer = None;
        for handler in self.connections.values_mut() {
            handler.clear_keepalive();
        }
    }

    /// Clears the timer slot matching a fire; false for stale fires
    pub(crate) fn take_timer(&mut self, kind: &TimerKind, generation: u64) -> bool {
        match kind {
            TimerKind::CallTimeout => take_if_current(&mut self.call_timer, generation),
            TimerKind::NotificationConfirm => take_if_current(&mut self.notification_timer, generation),
            TimerKind::DisconnectGrace => take_if_current(&mut self.disconnect_timer, generation),
            TimerKind::DisposeGrace => take_if_current(&mut self.dispose_timer, generation),
            TimerKind::KeepaliveWatchdog(connection) => self
                .connections
                .get_mut(connection)
                .map_or(false, |handler| handler.take_keepalive(generation)),
        }
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        IdentitySnapshot {
            id: self.id.clone(),
            online: self.online,
            busy: self.busy,
            room: self.room.clone(),
            active_connection: self.active_connection.clone(),
            call_type: self.call_type,
            call_state: self.call_state,
            connections: self.connections.keys().cloned().collect(),
            ringing: self.incoming_call.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Read-only view of an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySnapshot {
    pub id: IdentityId,
    pub online: bool,
    pub busy: bool,
    pub room: Option<RoomId>,
    pub active_connection: Option<ConnectionId>,
    pub call_type: CallType,
    pub call_state: IdentityCallState,
    pub connections: Vec<ConnectionId>,
    pub ringing: bool,
    pub created_at: DateTime<Utc>,
}
