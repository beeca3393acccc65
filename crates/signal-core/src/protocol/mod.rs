//! Wire protocol: frame envelopes and the call payload they carry

pub mod frames;
pub mod payload;

pub use frames::{names, InboundFrame, MediaDevicesStatus, OutboundFrame, ServiceStatus};
pub use payload::CallPayload;
