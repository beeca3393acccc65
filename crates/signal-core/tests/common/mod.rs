//! Shared harness for the call-flow tests
//!
//! Tests run on a paused clock. Every helper that submits work ends with
//! `settle()`, which lets the worker and any spawned collaborator tasks run
//! to idle without letting time move.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use callwire_signal_core::{
    names, CallHistory, CallPayload, CallType, Collaborators, ConnectionId, IdentityId, InboundFrame,
    MediaCapacity, NotificationAck, NotificationService, Orchestrator, OrchestratorHandle, OutboundFrame,
    RegistrySnapshot, SignalConfig, SignalError, StaticMediaService,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub from: IdentityId,
    pub to: IdentityId,
    pub duration_ms: u64,
    pub call_type: CallType,
}

/// Notification service that records pushes and cancellations.
/// With `fail` set every push errors after being recorded.
#[derive(Debug, Default)]
pub struct RecordingNotifications {
    pub sent: Mutex<Vec<(IdentityId, CallPayload)>>,
    pub cancelled: Mutex<Vec<IdentityId>>,
    pub deliver: Mutex<bool>,
    pub fail: Mutex<bool>,
}

#[async_trait]
impl NotificationService for RecordingNotifications {
    async fn send_push_notification(
        &self,
        target: &IdentityId,
        payload: &CallPayload,
    ) -> callwire_signal_core::Result<NotificationAck> {
        self.sent.lock().push((target.clone(), payload.clone()));
        if *self.fail.lock() {
            return Err(SignalError::collaborator("notifications", "push provider unreachable"));
        }
        Ok(NotificationAck {
            delivered: *self.deliver.lock(),
        })
    }

    async fn cancel_push_notification(&self, target: &IdentityId) -> callwire_signal_core::Result<()> {
        self.cancelled.lock().push(target.clone());
        Ok(())
    }
}

/// Call history that keeps every record
#[derive(Debug, Default)]
pub struct RecordingHistory {
    pub records: Mutex<Vec<CallRecord>>,
}

#[async_trait]
impl CallHistory for RecordingHistory {
    async fn log_call_event(
        &self,
        from: &IdentityId,
        to: &IdentityId,
        duration_ms: u64,
        call_type: CallType,
    ) -> callwire_signal_core::Result<()> {
        self.records.lock().push(CallRecord {
            from: from.clone(),
            to: to.clone(),
            duration_ms,
            call_type,
        });
        Ok(())
    }
}

impl RecordingHistory {
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }
}

pub struct Harness {
    pub handle: OrchestratorHandle,
    pub notifications: Arc<RecordingNotifications>,
    pub history: Arc<RecordingHistory>,
    _worker: JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(SignalConfig::default())
    }

    pub fn with_config(config: SignalConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("callwire_signal_core=debug")
            .with_test_writer()
            .try_init();

        let notifications = Arc::new(RecordingNotifications::default());
        let history = Arc::new(RecordingHistory::default());
        let media = Arc::new(StaticMediaService {
            capacity: MediaCapacity { active: 3, limit: 500 },
        });
        let collaborators = Collaborators::new(notifications.clone(), history.clone(), media);
        let (handle, worker) = Orchestrator::spawn(config, collaborators).expect("valid config");
        Self {
            handle,
            notifications,
            history,
            _worker: worker,
        }
    }

    /// Run the worker and spawned tasks until nothing is left to do
    pub async fn settle(&self) {
        for _ in 0..3 {
            self.handle.snapshot().await.expect("worker alive");
            for _ in 0..16 {
                tokio::task::yield_now().await;
            }
        }
    }

    /// Open a connection and log it in; the USER_LOGGEDIN frame is consumed
    pub async fn login(&self, identity: &str) -> Client {
        let (sink, frames) = mpsc::unbounded_channel();
        let connection = ConnectionId::generate();
        self.handle.connect(connection.clone(), sink).unwrap();
        self.handle
            .inbound(
                connection.clone(),
                InboundFrame::UserLogin {
                    identity: identity.into(),
                },
            )
            .unwrap();
        self.settle().await;

        let mut client = Client {
            connection,
            identity: IdentityId::new(identity),
            frames,
        };
        match client.next() {
            Some(OutboundFrame::UserLoggedIn { identity: logged_in, .. }) => {
                assert_eq!(logged_in.as_str(), identity)
            }
            other => panic!("expected USER_LOGGEDIN, got {:?}", other),
        }
        client
    }

    pub async fn send(&self, client: &Client, frame: InboundFrame) {
        self.handle.inbound(client.connection.clone(), frame).unwrap();
        self.settle().await;
    }

    pub async fn send_text(&self, client: &Client, text: &str) {
        let _ = self.handle.inbound_text(&client.connection, text);
        self.settle().await;
    }

    pub async fn close(&self, client: &Client) {
        self.handle.disconnect(client.connection.clone()).unwrap();
        self.settle().await;
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.handle.snapshot().await.unwrap()
    }

    pub async fn is_busy(&self, identity: &str) -> bool {
        self.handle.is_busy(identity.into()).await.unwrap()
    }

    /// Let paused time run forward, firing any timers on the way
    pub async fn wait(&self, duration: std::time::Duration) {
        tokio::time::sleep(duration).await;
        self.settle().await;
    }

    pub fn cancelled_pushes(&self) -> Vec<IdentityId> {
        self.notifications.cancelled.lock().clone()
    }

    pub fn sent_pushes(&self) -> Vec<IdentityId> {
        self.notifications.sent.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

/// One client connection as seen by the test
pub struct Client {
    pub connection: ConnectionId,
    pub identity: IdentityId,
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl Client {
    pub fn next(&mut self) -> Option<OutboundFrame> {
        self.frames.try_recv().ok()
    }

    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Event names of everything received since the last drain
    pub fn events(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(OutboundFrame::event_name).collect()
    }
}

pub fn payload(caller: &str, callee: &str) -> CallPayload {
    CallPayload::between(&caller.into(), &callee.into(), CallType::Video)
}

pub fn start(caller: &str, callee: &str) -> InboundFrame {
    InboundFrame::CallStart(payload(caller, callee))
}

pub fn accept(caller: &str, callee: &str) -> InboundFrame {
    InboundFrame::CallAccept(payload(caller, callee))
}

pub fn reject(caller: &str, callee: &str) -> InboundFrame {
    InboundFrame::CallReject(payload(caller, callee))
}

pub fn end(caller: &str, callee: &str) -> InboundFrame {
    InboundFrame::CallEnd(payload(caller, callee))
}

pub const NO_EVENTS: [&str; 0] = [];

pub use names::*;
