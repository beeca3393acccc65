//! External collaborators consumed by the orchestration layer
//!
//! The core never blocks on these. Async calls are spawned as independent
//! tasks; failures are logged there and never reach call control.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::Result;
use crate::protocol::{CallPayload, ServiceStatus};
use crate::types::{CallType, IdentityId};

/// Acknowledgement returned by the push-notification service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationAck {
    /// The push was handed to a device
    pub delivered: bool,
}

/// Push notifications used as the offline fallback for incoming calls
#[async_trait]
pub trait NotificationService: Send + Sync + 'static {
    async fn send_push_notification(
        &self,
        target: &IdentityId,
        payload: &CallPayload,
    ) -> Result<NotificationAck>;

    async fn cancel_push_notification(&self, target: &IdentityId) -> Result<()>;
}

/// Call-history sink. A missed call is reported with a zero duration.
#[async_trait]
pub trait CallHistory: Send + Sync + 'static {
    async fn log_call_event(
        &self,
        from: &IdentityId,
        to: &IdentityId,
        duration_ms: u64,
        call_type: CallType,
    ) -> Result<()>;
}

/// Load of the media engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaCapacity {
    pub active: usize,
    pub limit: usize,
}

impl MediaCapacity {
    pub fn is_overloaded(&self) -> bool {
        self.active >= self.limit
    }

    pub fn to_service_status(self) -> ServiceStatus {
        ServiceStatus {
            sfu_available: !self.is_overloaded(),
            sfu_load: format!("{}/{}", self.active, self.limit),
        }
    }
}

/// Media engine, seen only through its capacity flag
pub trait MediaService: Send + Sync + 'static {
    fn capacity(&self) -> MediaCapacity;
}

/// Bundle of collaborators handed to the registry
#[derive(Clone)]
pub struct Collaborators {
    pub notifications: Arc<dyn NotificationService>,
    pub history: Arc<dyn CallHistory>,
    pub media: Arc<dyn MediaService>,
}

impl Collaborators {
    pub fn new(
        notifications: Arc<dyn NotificationService>,
        history: Arc<dyn CallHistory>,
        media: Arc<dyn MediaService>,
    ) -> Self {
        Self {
            notifications,
            history,
            media,
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            notifications: Arc::new(NoopNotificationService),
            history: Arc::new(NoopCallHistory),
            media: Arc::new(StaticMediaService::default()),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Notification service that delivers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotificationService;

#[async_trait]
impl NotificationService for NoopNotificationService {
    async fn send_push_notification(
        &self,
        _target: &IdentityId,
        _payload: &CallPayload,
    ) -> Result<NotificationAck> {
        Ok(NotificationAck { delivered: false })
    }

    async fn cancel_push_notification(&self, _target: &IdentityId) -> Result<()> {
        Ok(())
    }
}

/// Call history that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallHistory;

#[async_trait]
impl CallHistory for NoopCallHistory {
    async fn log_call_event(
        &self,
        _from: &IdentityId,
        _to: &IdentityId,
        _duration_ms: u64,
        _call_type: CallType,
    ) -> Result<()> {
        Ok(())
    }
}

/// Media service reporting a fixed capacity
#[derive(Debug, Clone, Copy)]
pub struct StaticMediaService {
    pub capacity: MediaCapacity,
}

impl Default for StaticMediaService {
    fn default() -> Self {
        Self {
            capacity: MediaCapacity { active: 0, limit: 500 },
        }
    }
}

impl MediaService for StaticMediaService {
    fn capacity(&self) -> MediaCapacity {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_maps_to_service_status() {
        let status = MediaCapacity { active: 500, limit: 500 }.to_service_status();
        assert!(!status.sfu_available);
        assert_eq!(status.sfu_load, "500/500");

        let status = MediaCapacity { active: 12, limit: 500 }.to_service_status();
        assert!(status.sfu_available);
    }
}
