//! Orchestration worker
//!
//! A single task owns the [`OrchestrationRegistry`] and drains one command
//! queue, so every frame, timer fire and collaborator completion is handled
//! to completion before the next one starts. Transports talk to the worker
//! through a cloneable [`OrchestratorHandle`].

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::collaborators::{Collaborators, NotificationAck};
use crate::config::SignalConfig;
use crate::connection::OutboundSink;
use crate::errors::{Result, SignalError};
use crate::protocol::InboundFrame;
use crate::registry::{OrchestrationRegistry, RegistrySnapshot};
use crate::timers::TimerFired;
use crate::types::{ConnectionId, IdentityId};

/// Work item for the orchestration worker
#[derive(Debug)]
pub enum Command {
    /// A transport connection opened; it stays anonymous until it logs in
    Connect {
        connection: ConnectionId,
        sink: OutboundSink,
    },
    /// A decoded frame from a connection
    Inbound {
        connection: ConnectionId,
        frame: InboundFrame,
    },
    /// A transport connection closed
    Disconnect { connection: ConnectionId },
    TimerFired(TimerFired),
    /// A push-notification attempt finished
    NotificationCompleted {
        identity: IdentityId,
        generation: u64,
        result: Result<NotificationAck>,
    },
    Snapshot {
        reply: oneshot::Sender<RegistrySnapshot>,
    },
    IsBusy {
        identity: IdentityId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Owns the registry and its command queue
pub struct Orchestrator {
    registry: OrchestrationRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Orchestrator {
    /// Build a worker and the handle that feeds it
    pub fn new(config: SignalConfig, collaborators: Collaborators) -> Result<(Self, OrchestratorHandle)> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = OrchestrationRegistry::new(config, collaborators, tx.clone());
        Ok((
            Self {
                registry,
                commands: rx,
            },
            OrchestratorHandle { commands: tx },
        ))
    }

    /// Build the worker and run it on its own task
    pub fn spawn(
        config: SignalConfig,
        collaborators: Collaborators,
    ) -> Result<(OrchestratorHandle, JoinHandle<()>)> {
        let (worker, handle) = Self::new(config, collaborators)?;
        let task = tokio::spawn(worker.run());
        Ok((handle, task))
    }

    /// Drain commands until shutdown
    pub async fn run(mut self) {
        tracing::info!("Starting orchestration worker");

        while let Some(command) = self.commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.registry.handle_command(command);
        }

        tracing::info!("Orchestration worker stopped");
    }
}

/// Cloneable entry point used by transports
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    fn submit(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| SignalError::WorkerClosed)
    }

    pub fn connect(&self, connection: ConnectionId, sink: OutboundSink) -> Result<()> {
        self.submit(Command::Connect { connection, sink })
    }

    pub fn inbound(&self, connection: ConnectionId, frame: InboundFrame) -> Result<()> {
        self.submit(Command::Inbound { connection, frame })
    }

    /// Decode a text frame and queue it. Undecodable frames are returned as
    /// protocol errors and never reach the worker.
    pub fn inbound_text(&self, connection: &ConnectionId, text: &str) -> Result<()> {
        let frame = InboundFrame::decode(text)?;
        self.inbound(connection.clone(), frame)
    }

    pub fn disconnect(&self, connection: ConnectionId) -> Result<()> {
        self.submit(Command::Disconnect { connection })
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Snapshot { reply })?;
        rx.await.map_err(|_| SignalError::WorkerClosed)
    }

    pub async fn is_busy(&self, identity: IdentityId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::IsBusy { identity, reply })?;
        rx.await.map_err(|_| SignalError::WorkerClosed)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.submit(Command::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = SignalConfig {
            call_timeout_ms: 0,
            ..Default::default()
        };
        assert!(Orchestrator::spawn(config, Collaborators::default()).is_err());
    }

    #[tokio::test]
    async fn handle_fails_after_shutdown() {
        let (handle, task) = Orchestrator::spawn(SignalConfig::default(), Collaborators::default()).unwrap();
        assert!(handle.snapshot().await.unwrap().identities.is_empty());

        handle.shutdown().unwrap();
        task.await.unwrap();
        assert!(matches!(handle.snapshot().await, Err(SignalError::WorkerClosed)));
    }

    #[tokio::test]
    async fn undecodable_text_is_a_protocol_error() {
        let (handle, _task) = Orchestrator::spawn(SignalConfig::default(), Collaborators::default()).unwrap();
        let err = handle.inbound_text(&"conn-1".into(), "{").unwrap_err();
        assert!(err.is_protocol());
    }
}
