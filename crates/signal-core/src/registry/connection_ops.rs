//! Connection lifecycle and call control driven by inbound frames

use crate::connection::{ConnectionHandler, OutboundSink};
use crate::errors::{ProtocolError, Result, SignalError};
use crate::protocol::{CallPayload, InboundFrame, OutboundFrame};
use crate::types::{CallState, ConnectionId, IdentityId, RoomId};

use super::OrchestrationRegistry;

impl OrchestrationRegistry {
    /// A transport connection opened
    pub fn connect(&mut self, connection: ConnectionId, sink: OutboundSink) {
        tracing::debug!(connection = %connection, "Connection opened");
        self.pending.insert(connection, sink);
    }

    /// A transport connection closed
    pub fn disconnect(&mut self, connection: &ConnectionId) {
        if self.pending.remove(connection).is_some() {
            tracing::debug!(connection = %connection, "Anonymous connection closed");
            return;
        }
        let Some(identity) = self.owners.remove(connection) else {
            tracing::debug!(connection = %connection, "Unknown connection closed");
            return;
        };
        if let Some(session) = self.identities.get_mut(&identity) {
            session.remove_connection(
                connection,
                &self.scheduler,
                self.config.disconnect_grace(),
                self.config.dispose_grace(),
            );
            tracing::info!(
                identity = %identity,
                connection = %connection,
                remaining = session.connection_count(),
                "Connection closed"
            );
        }
    }

    /// Translate one inbound frame into registry operations
    pub fn handle_inbound(&mut self, connection: &ConnectionId, frame: InboundFrame) -> Result<()> {
        let identity = match &frame {
            InboundFrame::UserLogin { identity } => return self.login(connection, identity.clone()),
            _ => self
                .owners
                .get(connection)
                .cloned()
                .ok_or_else(|| SignalError::connection_not_found(connection))?,
        };

        match frame {
            InboundFrame::UserLogin { .. } => Ok(()),
            InboundFrame::CallStart(payload) => self.create_call(connection, &identity, payload),
            InboundFrame::CallAccept(payload) => self.accept_call(connection, &identity, payload),
            InboundFrame::CallReject(payload) => self.reject_call(connection, &identity, payload),
            InboundFrame::CallEnd(payload) => self.end_call(connection, &identity, payload),
            InboundFrame::CallClientReady => {
                self.client_ready(connection, &identity);
                Ok(())
            }
            InboundFrame::CallKeepalive => {
                self.keepalive(connection, &identity);
                Ok(())
            }
            InboundFrame::SendOffer(data) => {
                self.relay(connection, &identity, OutboundFrame::ReceiveOffer(data))
            }
            InboundFrame::SendAnswer(data) => {
                self.relay(connection, &identity, OutboundFrame::ReceiveAnswer(data))
            }
            InboundFrame::SendCandidate(data) => {
                self.relay(connection, &identity, OutboundFrame::ReceiveCandidate(data))
            }
            InboundFrame::ChangeMediaDevices(status) => {
                self.relay(connection, &identity, OutboundFrame::UpdateMediaDevicesStatus(status))
            }
            InboundFrame::CheckCalleeStatus { callee } => {
                self.check_callee_status(connection, &identity, &callee);
                Ok(())
            }
            InboundFrame::SwitchToVideo => {
                self.relay(connection, &identity, OutboundFrame::SwitchToVideoRequested)
            }
            InboundFrame::SwitchToVideoAccept => {
                self.relay(connection, &identity, OutboundFrame::SwitchToVideoAccepted)
            }
            InboundFrame::SwitchToVideoReject => {
                self.relay(connection, &identity, OutboundFrame::SwitchToVideoRejected)
            }
        }
    }

    /// Bind a connection to an identity
    pub fn login(&mut self, connection: &ConnectionId, identity: IdentityId) -> Result<()> {
        if identity.is_empty() {
            return Err(ProtocolError::missing_id("identity").into());
        }

        let sink = match self.pending.remove(connection) {
            Some(sink) => sink,
            None => match self.owners.get(connection).cloned() {
                Some(current) if current == identity => {
                    tracing::debug!(identity = %identity, connection = %connection, "Repeated login");
                    self.send_to(
                        connection,
                        OutboundFrame::UserLoggedIn {
                            identity,
                            service_status: self.service_status(),
                        },
                    );
                    return Ok(());
                }
                Some(previous) => self.release_connection(connection, &previous)?,
                None => return Err(SignalError::connection_not_found(connection)),
            },
        };

        let handler = ConnectionHandler::new(connection.clone(), identity.clone(), sink);
        let service_status = self.service_status();
        let session = self.get_or_create_identity(&identity, Some(handler));
        session.emit_to(
            connection,
            OutboundFrame::UserLoggedIn {
                identity: identity.clone(),
                service_status,
            },
        );
        tracing::info!(
            identity = %identity,
            connection = %connection,
            connections = session.connection_count(),
            "User logged in"
        );

        if session.reconnect(connection) {
            self.arm_watchdog(&identity, connection);
        } else if let Some(payload) = session.incoming_call().cloned() {
            session.emit_all(OutboundFrame::CallIncoming(payload));
        }
        Ok(())
    }

    /// Detach a connection from `previous` so it can log in as someone else
    fn release_connection(&mut self, connection: &ConnectionId, previous: &IdentityId) -> Result<OutboundSink> {
        self.owners.remove(connection);
        let session = self
            .identities
            .get_mut(previous)
            .ok_or_else(|| SignalError::identity_not_found(previous))?;
        let handler = session
            .remove_connection(
                connection,
                &self.scheduler,
                self.config.disconnect_grace(),
                self.config.dispose_grace(),
            )
            .ok_or_else(|| SignalError::connection_not_found(connection))?;
        tracing::info!(identity = %previous, connection = %connection, "Connection switching identity");
        Ok(handler.into_sink())
    }

    /// CALL_START
    pub fn create_call(
        &mut self,
        connection: &ConnectionId,
        identity: &IdentityId,
        payload: CallPayload,
    ) -> Result<()> {
        let (caller, callee) = payload.require_parties()?;
        if caller != *identity {
            return Err(SignalError::invalid_state(format!(
                "call start for {} sent by {}",
                caller, identity
            )));
        }
        if caller == callee {
            return Err(SignalError::invalid_state(format!("{} cannot call itself", caller)));
        }

        if self.is_busy(&caller) {
            tracing::info!(caller = %caller, "Caller already in a call");
            self.send_to(connection, OutboundFrame::CallOngoing);
            return Ok(());
        }
        if self.is_busy(&callee) {
            tracing::info!(caller = %caller, callee = %callee, "Callee busy");
            self.send_to(connection, OutboundFrame::CallBusy);
            self.log_missed_call(&caller, &callee, payload.call_type);
            return Ok(());
        }

        self.clear_stale_call(&caller);
        self.clear_stale_call(&callee);

        let Some(room) =
            self.create_call_session(&caller, &callee, payload.call_type, payload.call_protocol)
        else {
            self.send_to(connection, OutboundFrame::CallBusy);
            return Ok(());
        };
        if let Some(session) = self.sessions.get_mut(&room) {
            session.join(&caller)?;
        }

        let call_timeout = self.config.call_timeout();
        let caller_session = self
            .identities
            .get_mut(&caller)
            .ok_or_else(|| SignalError::identity_not_found(&caller))?;
        caller_session.begin_outgoing(room.clone(), connection.clone(), payload.call_type);
        caller_session.start_call_timer(&self.scheduler, call_timeout);

        let invite = CallPayload {
            room_id: room.to_string(),
            ..payload
        };
        self.get_or_create_identity(&callee, None)
            .receive_invite(room.clone(), invite.clone());
        let delivered = self.route_to_identity(Some(connection), &callee, OutboundFrame::CallIncoming(invite.clone()));
        tracing::info!(room = %room, caller = %caller, callee = %callee, delivered, "Call started");

        self.arm_watchdog(&caller, connection);
        self.attempt_notification(&caller, &callee, invite);
        Ok(())
    }

    /// CALL_ACCEPT
    pub fn accept_call(
        &mut self,
        connection: &ConnectionId,
        identity: &IdentityId,
        payload: CallPayload,
    ) -> Result<()> {
        let session = self
            .identities
            .get_mut(identity)
            .ok_or_else(|| SignalError::identity_not_found(identity))?;

        let Some(room) = session.room().cloned().filter(|_| session.busy_flag()) else {
            tracing::debug!(identity = %identity, "Accept without a call");
            session.emit_to(connection, OutboundFrame::CallEnded);
            return Ok(());
        };
        if !session.may_control_call(connection) {
            tracing::info!(identity = %identity, connection = %connection, "Call already taken by another device");
            session.emit_to(connection, OutboundFrame::CallOngoing);
            return Ok(());
        }
        if let Some(requested) = payload.room() {
            if requested != room {
                return Err(SignalError::invalid_state(format!(
                    "accept for {} while ringing for {}",
                    requested, room
                )));
            }
        }

        let Some(call) = self.sessions.get_mut(&room) else {
            session.reset_call_info();
            session.emit_to(connection, OutboundFrame::CallEnded);
            return Ok(());
        };
        if call.callee() != identity {
            return Err(SignalError::invalid_state(format!(
                "{} cannot accept its own call {}",
                identity, room
            )));
        }
        call.join(identity)?;
        let Some(notify) = call.on_call_accepted(identity) else {
            return Ok(());
        };

        for member in &notify {
            if let Some(other) = self.identities.get_mut(member) {
                other.on_call_accepted();
            }
        }
        if let Some(session) = self.identities.get_mut(identity) {
            session.mark_accepting(connection);
        }
        self.cancel_push(identity);
        self.arm_watchdog(identity, connection);
        Ok(())
    }

    /// CALL_REJECT
    pub fn reject_call(
        &mut self,
        connection: &ConnectionId,
        identity: &IdentityId,
        payload: CallPayload,
    ) -> Result<()> {
        if self.refuse_other_device(connection, identity) {
            return Ok(());
        }
        let Some(room) = self.current_room(identity, &payload)? else {
            return Ok(());
        };
        tracing::info!(identity = %identity, room = %room, "Call rejected");
        self.terminate_session(&room, CallState::Rejected);
        Ok(())
    }

    /// CALL_END
    pub fn end_call(
        &mut self,
        connection: &ConnectionId,
        identity: &IdentityId,
        payload: CallPayload,
    ) -> Result<()> {
        if self.refuse_other_device(connection, identity) {
            return Ok(());
        }
        let Some(room) = self.current_room(identity, &payload)? else {
            return Ok(());
        };
        tracing::info!(identity = %identity, room = %room, "Call ended");
        self.terminate_session(&room, CallState::Ended);
        Ok(())
    }

    /// Answer CALL_ONGOING to a device that is not driving the identity's
    /// call. Returns true when the frame must be dropped.
    fn refuse_other_device(&self, connection: &ConnectionId, identity: &IdentityId) -> bool {
        let Some(session) = self.identities.get(identity) else {
            return false;
        };
        if session.may_control_call(connection) {
            return false;
        }
        tracing::info!(identity = %identity, connection = %connection, "Call is driven by another device");
        session.emit_to(connection, OutboundFrame::CallOngoing);
        true
    }

    /// Room the identity is in, validated against the room the payload names.
    /// A stale reference to a deleted session is cleared on the way.
    fn current_room(&mut self, identity: &IdentityId, payload: &CallPayload) -> Result<Option<RoomId>> {
        let Some(session) = self.identities.get_mut(identity) else {
            return Err(SignalError::identity_not_found(identity));
        };
        let Some(room) = session.room().cloned() else {
            tracing::debug!(identity = %identity, "Not in a call");
            return Ok(None);
        };
        if let Some(requested) = payload.room() {
            if requested != room {
                return Err(SignalError::invalid_state(format!(
                    "{} refers to {} but is in {}",
                    identity, requested, room
                )));
            }
        }
        if !self.sessions.contains_key(&room) {
            session.reset_call_info();
            return Ok(None);
        }
        Ok(Some(room))
    }

    /// CALL_CLIENT_READY
    pub fn client_ready(&mut self, connection: &ConnectionId, identity: &IdentityId) {
        if self.refuse_other_device(connection, identity) {
            return;
        }
        let Some(room) = self.identities.get(identity).and_then(|s| s.room().cloned()) else {
            tracing::debug!(identity = %identity, "Ready outside of a call");
            return;
        };
        let Some(ready) = self
            .sessions
            .get_mut(&room)
            .and_then(|session| session.on_member_call_ready(identity))
        else {
            return;
        };
        for member in &ready {
            if let Some(session) = self.identities.get_mut(member) {
                session.on_call_ready();
            }
        }
    }

    /// CALL_KEEPALIVE
    pub fn keepalive(&mut self, connection: &ConnectionId, identity: &IdentityId) {
        let Some(session) = self.identities.get_mut(identity) else {
            return;
        };
        session.refresh_keepalive();
        let drives_call =
            session.busy_flag() && session.active_connection().map_or(true, |active| active == connection);
        if drives_call {
            self.arm_watchdog(identity, connection);
        }
    }

    /// Pass a frame to the other participant of the identity's call.
    /// Both sides must have joined, and only the authoritative device of
    /// the sender is heard.
    pub fn relay(
        &mut self,
        connection: &ConnectionId,
        identity: &IdentityId,
        frame: OutboundFrame,
    ) -> Result<()> {
        let sender = self
            .identities
            .get(identity)
            .ok_or_else(|| SignalError::identity_not_found(identity))?;
        let room = sender
            .room()
            .cloned()
            .ok_or_else(|| SignalError::invalid_state(format!("{} is not in a call", identity)))?;
        if !sender.may_control_call(connection) {
            tracing::debug!(identity = %identity, connection = %connection, "Relay from a device not driving the call");
            return Ok(());
        }
        let session = self
            .sessions
            .get(&room)
            .ok_or_else(|| SignalError::session_not_found(&room))?;
        let Some(other) = session.counterpart(identity) else {
            return Err(SignalError::invalid_state(format!("{} is not part of {}", identity, room)));
        };
        if !session.is_member(identity) || !session.is_member(other) {
            tracing::debug!(identity = %identity, room = %room, "Relay before both sides joined");
            return Ok(());
        }
        if let Some(target) = self.identities.get(other) {
            target.emit(frame);
        }
        Ok(())
    }

    /// CALL_CHECK_CALLEE_STATUS
    pub fn check_callee_status(
        &mut self,
        connection: &ConnectionId,
        identity: &IdentityId,
        callee: &IdentityId,
    ) {
        let frame = OutboundFrame::CalleeStatus {
            busy: !callee.is_empty() && self.is_busy(callee),
            ongoing: self.is_busy(identity),
        };
        self.send_to(connection, frame);
    }

    /// End whatever call a busy flag that failed `is_busy` still points at
    fn clear_stale_call(&mut self, id: &IdentityId) {
        let stale = self
            .identities
            .get(id)
            .map_or(false, |session| session.busy_flag() || session.room().is_some());
        if stale {
            tracing::info!(identity = %id, "Clearing stale call state");
            self.force_end(id);
        }
    }
}
