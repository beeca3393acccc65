//! Per-connection handler
//!
//! A [`ConnectionHandler`] is the registry's view of one live transport
//! connection: the identity it logged in as and the sink its outbound frames
//! go to. Inbound frames are dispatched by the registry (see
//! `registry::connection_ops`).

use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::OutboundFrame;
use crate::timers::{take_if_current, TimerHandle, TimerKind, TimerScheduler};
use crate::types::{ConnectionId, IdentityId};

/// Where frames for one connection are written. The transport drains it.
pub type OutboundSink = mpsc::UnboundedSender<OutboundFrame>;

#[derive(Debug)]
pub struct ConnectionHandler {
    id: ConnectionId,
    identity: IdentityId,
    sink: OutboundSink,
    keepalive_timer: Option<TimerHandle>,
}

impl ConnectionHandler {
    pub fn new(id: ConnectionId, identity: IdentityId, sink: OutboundSink) -> Self {
        Self {
            id,
            identity,
            sink,
            keepalive_timer: None,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Give up the sink, e.g. when the connection logs in as another identity
    pub fn into_sink(self) -> OutboundSink {
        self.sink
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }

    /// Queue a frame. Returns false when the transport side is gone.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        let event = frame.event_name();
        match self.sink.send(frame) {
            Ok(()) => {
                tracing::trace!(connection = %self.id, identity = %self.identity, event, "Frame queued");
                true
            }
            Err(_) => {
                tracing::debug!(
                    connection = %self.id,
                    identity = %self.identity,
                    event,
                    "Dropping frame for closed connection"
                );
                false
            }
        }
    }

    /// (Re)arm the keepalive watchdog
    pub fn arm_keepalive(&mut self, scheduler: &TimerScheduler, after: Duration) {
        self.keepalive_timer = Some(scheduler.schedule(
            &self.identity,
            TimerKind::KeepaliveWatchdog(self.id.clone()),
            after,
        ));
    }

    pub fn clear_keepalive(&mut self) {
        self.keepalive_timer = None;
    }

    pub(crate) fn take_keepalive(&mut self, generation: u64) -> bool {
        take_if_current(&mut self.keepalive_timer, generation)
    }
}
