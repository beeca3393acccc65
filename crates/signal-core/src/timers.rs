//! Cancellable per-identity timers
//!
//! A timer is a spawned sleep that posts [`Command::TimerFired`] back to the
//! worker. Every timer carries a generation number; the owner stores the
//! handle and only acts on a fire whose generation matches the stored one.
//! Cancelling aborts the task and drops the handle, so a fire that was
//! already queued when the timer was cancelled finds no matching handle and
//! is ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{ConnectionId, IdentityId};
use crate::worker::Command;

/// What a timer guards
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Unanswered invite, armed on the caller
    CallTimeout,
    /// Wait for the push-notification ack, armed on the caller
    NotificationConfirm,
    /// Authoritative connection dropped mid-call
    DisconnectGrace,
    /// Identity has no connections left
    DisposeGrace,
    /// No keepalive from the authoritative connection
    KeepaliveWatchdog(ConnectionId),
}

/// Posted to the worker when a timer elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub identity: IdentityId,
    pub kind: TimerKind,
    pub generation: u64,
}

/// Handle of an armed timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Clears `slot` and returns true when it holds the timer that fired
pub(crate) fn take_if_current(slot: &mut Option<TimerHandle>, generation: u64) -> bool {
    match slot {
        Some(handle) if handle.generation == generation => {
            // the task already finished; dropping the handle is enough
            slot.take();
            true
        }
        _ => false,
    }
}

/// Spawns timers that report back to the worker's command queue
#[derive(Debug)]
pub struct TimerScheduler {
    commands: mpsc::UnboundedSender<Command>,
    next_generation: AtomicU64,
}

impl TimerScheduler {
    pub fn new(commands: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            commands,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Arm a timer for `identity` that fires after `after`
    pub fn schedule(&self, identity: &IdentityId, kind: TimerKind, after: Duration) -> TimerHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fired = TimerFired {
            identity: identity.clone(),
            kind,
            generation,
        };
        let commands = self.commands.clone();

        tracing::trace!(
            identity = %fired.identity,
            kind = ?fired.kind,
            generation,
            after_ms = after.as_millis() as u64,
            "Timer armed"
        );

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // the worker may already be gone during shutdown
            let _ = commands.send(Command::TimerFired(fired));
        });

        TimerHandle { generation, task }
    }
}
