//! Timer fires, push-notification completions and forced termination

use crate::collaborators::NotificationAck;
use crate::errors::Result;
use crate::protocol::CallPayload;
use crate::timers::{TimerFired, TimerKind};
use crate::types::{CallState, ConnectionId, IdentityId};
use crate::worker::Command;

use super::OrchestrationRegistry;

impl OrchestrationRegistry {
    /// Apply a timer fire. Fires whose handle was cancelled or replaced are ignored.
    pub fn on_timer_fired(&mut self, fired: TimerFired) {
        let TimerFired {
            identity,
            kind,
            generation,
        } = fired;

        let current = self
            .identities
            .get_mut(&identity)
            .map_or(false, |session| session.take_timer(&kind, generation));
        if !current {
            tracing::trace!(identity = %identity, kind = ?kind, generation, "Stale timer fire ignored");
            return;
        }

        match kind {
            TimerKind::CallTimeout => self.on_call_timeout(&identity),
            TimerKind::NotificationConfirm => self.on_notification_expired(&identity),
            TimerKind::DisconnectGrace => {
                tracing::info!(identity = %identity, "Disconnect grace expired, ending call");
                self.force_end(&identity);
            }
            TimerKind::DisposeGrace => self.dispose(&identity),
            TimerKind::KeepaliveWatchdog(connection) => {
                tracing::warn!(identity = %identity, connection = %connection, "Keepalive watchdog expired, ending call");
                self.force_end(&identity);
            }
        }
    }

    fn on_call_timeout(&mut self, caller: &IdentityId) {
        let Some(room) = self.identities.get(caller).and_then(|s| s.room().cloned()) else {
            return;
        };
        let ringing = self
            .sessions
            .get(&room)
            .map_or(false, |session| session.caller() == caller && session.state() == CallState::Ringing);
        if ringing {
            tracing::info!(caller = %caller, room = %room, "Call timed out");
            self.terminate_session(&room, CallState::TimedOut);
        }
    }

    /// End the identity's call, telling the other side, or clear a dangling reference
    pub(super) fn force_end(&mut self, identity: &IdentityId) {
        let Some(room) = self.identities.get(identity).map(|s| s.room().cloned()) else {
            return;
        };
        match room {
            Some(room) if self.sessions.contains_key(&room) => {
                self.terminate_session(&room, CallState::Ended);
            }
            _ => {
                if let Some(session) = self.identities.get_mut(identity) {
                    session.reset_call_info();
                }
            }
        }
    }

    /// Evict an identity that stayed without connections for the grace period
    fn dispose(&mut self, identity: &IdentityId) {
        let connected = self
            .identities
            .get(identity)
            .map_or(false, |session| session.connection_count() > 0);
        if connected {
            return;
        }
        self.force_end(identity);
        if self.identities.remove(identity).is_some() {
            tracing::info!(identity = %identity, "Identity disposed");
        }
    }

    /// Re-arm the keepalive watchdog of `connection` when one is configured
    pub(super) fn arm_watchdog(&mut self, identity: &IdentityId, connection: &ConnectionId) {
        let Some(after) = self.config.keepalive_watchdog() else {
            return;
        };
        if let Some(handler) = self
            .identities
            .get_mut(identity)
            .and_then(|session| session.connection_mut(connection))
        {
            handler.arm_keepalive(&self.scheduler, after);
        }
    }

    /// Push the invite to the callee's devices as an offline fallback.
    ///
    /// The confirmation wait is armed on the caller; the collaborator result
    /// comes back as a command tagged with that timer's generation.
    pub(super) fn attempt_notification(&mut self, caller: &IdentityId, callee: &IdentityId, payload: CallPayload) {
        let confirm_after = self.config.notification_confirm();
        let Some(session) = self.identities.get_mut(caller) else {
            return;
        };
        let generation = session.arm_notification_timer(&self.scheduler, confirm_after);

        let notifications = self.collaborators.notifications.clone();
        let commands = self.commands.clone();
        let caller = caller.clone();
        let callee = callee.clone();
        tokio::spawn(async move {
            let result = notifications.send_push_notification(&callee, &payload).await;
            let _ = commands.send(Command::NotificationCompleted {
                identity: caller,
                generation,
                result,
            });
        });
    }

    pub fn on_notification_completed(
        &mut self,
        identity: &IdentityId,
        generation: u64,
        result: Result<NotificationAck>,
    ) {
        match result {
            Ok(NotificationAck { delivered: true }) => {
                let confirmed = self
                    .identities
                    .get_mut(identity)
                    .map_or(false, |session| session.confirm_notification(generation));
                if confirmed {
                    tracing::debug!(caller = %identity, "Push notification confirmed");
                } else {
                    tracing::debug!(caller = %identity, generation, "Late push confirmation discarded");
                }
            }
            Ok(NotificationAck { delivered: false }) => {
                tracing::debug!(caller = %identity, "Push notification not delivered");
            }
            Err(e) => {
                tracing::warn!(caller = %identity, error = %e, "Push notification failed");
            }
        }
    }

    /// No confirmation in time: withdraw the push, the call keeps ringing
    fn on_notification_expired(&mut self, caller: &IdentityId) {
        let callee = self
            .identities
            .get(caller)
            .and_then(|s| s.room())
            .and_then(|room| self.sessions.get(room))
            .map(|session| session.callee().clone());
        if let Some(callee) = callee {
            tracing::warn!(caller = %caller, callee = %callee, "Push notification not confirmed");
            self.cancel_push(&callee);
        }
    }
}
