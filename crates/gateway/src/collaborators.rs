//! Collaborators wired in by the standalone gateway
//!
//! The gateway ships without a push provider or a history store; both are
//! reported through tracing so deployments can see what would have happened.

use std::sync::Arc;

use async_trait::async_trait;
use callwire_signal_core::{
    CallHistory, CallPayload, CallType, Collaborators, IdentityId, MediaCapacity, NotificationAck,
    NotificationService, StaticMediaService,
};
use tracing::info;

/// Push service that only logs. Nothing is delivered, so the orchestrator
/// withdraws the push once the confirmation window lapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationService;

#[async_trait]
impl NotificationService for LoggingNotificationService {
    async fn send_push_notification(
        &self,
        target: &IdentityId,
        payload: &CallPayload,
    ) -> callwire_signal_core::Result<NotificationAck> {
        info!(
            "Push notification for {} (call from {}, {:?})",
            target, payload.caller_id, payload.call_type
        );
        Ok(NotificationAck { delivered: false })
    }

    async fn cancel_push_notification(&self, target: &IdentityId) -> callwire_signal_core::Result<()> {
        info!("Push notification for {} withdrawn", target);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallHistory;

#[async_trait]
impl CallHistory for TracingCallHistory {
    async fn log_call_event(
        &self,
        from: &IdentityId,
        to: &IdentityId,
        duration_ms: u64,
        call_type: CallType,
    ) -> callwire_signal_core::Result<()> {
        if duration_ms == 0 {
            info!(from = %from, to = %to, ?call_type, "Missed call");
        } else {
            info!(from = %from, to = %to, duration_ms, ?call_type, "Call completed");
        }
        Ok(())
    }
}

pub fn build(media_limit: usize) -> Collaborators {
    Collaborators::new(
        Arc::new(LoggingNotificationService),
        Arc::new(TracingCallHistory),
        Arc::new(StaticMediaService {
            capacity: MediaCapacity {
                active: 0,
                limit: media_limit,
            },
        }),
    )
}
