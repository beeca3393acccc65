//! Wire frames
//!
//! Frames travel as JSON envelopes `{"event": "<name>", "data": <payload>}`.
//! Decoding happens in two steps: the envelope is read first, then `data` is
//! parsed according to the event name. Events without a payload ignore
//! whatever `data` holds.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::payload::{lenient_string, value_kind, CallPayload};
use crate::errors::ProtocolError;
use crate::types::IdentityId;

/// Event names, in the `callserver:` namespace clients already speak
pub mod names {
    pub const USER_LOGIN: &str = "callserver:user_login";
    pub const USER_LOGGEDIN: &str = "callserver:user_loggedin";

    pub const CALL_START: &str = "callserver:call_start";
    pub const CALL_INCOMING: &str = "callserver:call_incoming";
    pub const CALL_ACCEPT: &str = "callserver:call_accept";
    pub const CALL_ACCEPTED: &str = "callserver:call_accept";
    pub const CALL_REJECT: &str = "callserver:call_reject";
    pub const CALL_REJECTED: &str = "callserver:call_reject";
    pub const CALL_END: &str = "callserver:call_end";
    pub const CALL_ENDED: &str = "callserver:call_ended";
    pub const CALL_TIMEDOUT: &str = "callserver:call_timeout";
    pub const CALL_BUSY: &str = "callserver:call_busy";
    pub const CALL_ONGOING: &str = "callserver:call_ongoing";
    pub const CALL_RECONNECTED: &str = "callserver:call_reconnected";

    pub const CALL_CLIENT_READY: &str = "callserver:call_client_ready";
    pub const CALL_WEBRTC_READY: &str = "callserver:call_ready";
    pub const CALL_KEEPALIVE: &str = "callserver:call_keepalive";

    pub const CALL_SEND_OFFER: &str = "callserver:call_send_offer";
    pub const CALL_RECEIVE_OFFER: &str = "callserver:call_receive_offer";
    pub const CALL_SEND_ANSWER: &str = "callserver:call_send_answer";
    pub const CALL_RECEIVE_ANSWER: &str = "callserver:call_receive_answer";
    pub const CALL_SEND_CANDIDATE: &str = "callserver:call_send_candidate";
    pub const CALL_RECEIVE_CANDIDATE: &str = "callserver:call_receive_candidate";

    pub const CALL_CHANGE_MEDIA_DEVICES: &str = "callserver:call_toggle_media_devices";
    pub const CALL_UPDATE_MEDIA_DEVICES_STATUS: &str = "callserver:call_update_media_devices_status";

    pub const CALL_CHECK_CALLEE_STATUS: &str = "callserver:call_check_busy";
    pub const CALL_CALLEE_STATUS: &str = "callserver:call_callee_status";

    pub const CALL_SWITCH_TO_VIDEO: &str = "callserver:call_switch_to_video";
    pub const CALL_SWITCH_TO_VIDEO_REQUESTED: &str = "callserver:call_switch_to_video_requested";
    pub const CALL_SWITCH_TO_VIDEO_ACCEPT: &str = "callserver:call_switch_to_video_accept";
    pub const CALL_SWITCH_TO_VIDEO_ACCEPTED: &str = "callserver:call_switch_to_video_accepted";
    pub const CALL_SWITCH_TO_VIDEO_REJECT: &str = "callserver:call_switch_to_video_reject";
    pub const CALL_SWITCH_TO_VIDEO_REJECTED: &str = "callserver:call_switch_to_video_rejected";
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Device toggle state broadcast to the other side of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDevicesStatus {
    #[serde(default, deserialize_with = "lenient_string")]
    pub identity: String,
    #[serde(default)]
    pub audio_on: bool,
    #[serde(default)]
    pub video_on: bool,
}

/// Capacity of the media collaborator, reported at login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub sfu_available: bool,
    /// `"<active>/<limit>"`
    pub sfu_load: String,
}

/// Frames received from clients
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    UserLogin { identity: IdentityId },
    CallStart(CallPayload),
    CallAccept(CallPayload),
    CallReject(CallPayload),
    CallEnd(CallPayload),
    CallClientReady,
    CallKeepalive,
    SendOffer(Value),
    SendAnswer(Value),
    SendCandidate(Value),
    ChangeMediaDevices(MediaDevicesStatus),
    CheckCalleeStatus { callee: IdentityId },
    SwitchToVideo,
    SwitchToVideoAccept,
    SwitchToVideoReject,
}

impl InboundFrame {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_parts(&envelope.event, &envelope.data)
    }

    /// Build a frame from an event name and its data
    pub fn from_parts(event: &str, data: &Value) -> Result<Self, ProtocolError> {
        let frame = match event {
            names::USER_LOGIN => InboundFrame::UserLogin {
                identity: IdentityId::new(id_field(event, data, "identity")?),
            },
            names::CALL_START => InboundFrame::CallStart(CallPayload::parse(event, data)?),
            names::CALL_ACCEPT => InboundFrame::CallAccept(CallPayload::parse(event, data)?),
            names::CALL_REJECT => InboundFrame::CallReject(CallPayload::parse(event, data)?),
            names::CALL_END => InboundFrame::CallEnd(CallPayload::parse(event, data)?),
            names::CALL_CLIENT_READY => InboundFrame::CallClientReady,
            names::CALL_KEEPALIVE => InboundFrame::CallKeepalive,
            names::CALL_SEND_OFFER => InboundFrame::SendOffer(data.clone()),
            names::CALL_SEND_ANSWER => InboundFrame::SendAnswer(data.clone()),
            names::CALL_SEND_CANDIDATE => InboundFrame::SendCandidate(data.clone()),
            names::CALL_CHANGE_MEDIA_DEVICES => InboundFrame::ChangeMediaDevices(
                MediaDevicesStatus::deserialize(data)
                    .map_err(|e| ProtocolError::invalid_payload(event, e))?,
            ),
            names::CALL_CHECK_CALLEE_STATUS => InboundFrame::CheckCalleeStatus {
                callee: IdentityId::new(id_field(event, data, "calleeId")?),
            },
            names::CALL_SWITCH_TO_VIDEO => InboundFrame::SwitchToVideo,
            names::CALL_SWITCH_TO_VIDEO_ACCEPT => InboundFrame::SwitchToVideoAccept,
            names::CALL_SWITCH_TO_VIDEO_REJECT => InboundFrame::SwitchToVideoReject,
            other => {
                return Err(ProtocolError::UnknownEvent {
                    event: other.to_string(),
                })
            }
        };
        Ok(frame)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            InboundFrame::UserLogin { .. } => names::USER_LOGIN,
            InboundFrame::CallStart(_) => names::CALL_START,
            InboundFrame::CallAccept(_) => names::CALL_ACCEPT,
            InboundFrame::CallReject(_) => names::CALL_REJECT,
            InboundFrame::CallEnd(_) => names::CALL_END,
            InboundFrame::CallClientReady => names::CALL_CLIENT_READY,
            InboundFrame::CallKeepalive => names::CALL_KEEPALIVE,
            InboundFrame::SendOffer(_) => names::CALL_SEND_OFFER,
            InboundFrame::SendAnswer(_) => names::CALL_SEND_ANSWER,
            InboundFrame::SendCandidate(_) => names::CALL_SEND_CANDIDATE,
            InboundFrame::ChangeMediaDevices(_) => names::CALL_CHANGE_MEDIA_DEVICES,
            InboundFrame::CheckCalleeStatus { .. } => names::CALL_CHECK_CALLEE_STATUS,
            InboundFrame::SwitchToVideo => names::CALL_SWITCH_TO_VIDEO,
            InboundFrame::SwitchToVideoAccept => names::CALL_SWITCH_TO_VIDEO_ACCEPT,
            InboundFrame::SwitchToVideoReject => names::CALL_SWITCH_TO_VIDEO_REJECT,
        }
    }
}

/// Identifier sent either bare (`"alice"`, `42`) or as `{ "<field>": ... }`
fn id_field(event: &str, data: &Value, field: &str) -> Result<String, ProtocolError> {
    let raw = match data {
        Value::Object(map) => map.get(field).cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    match raw {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(ProtocolError::invalid_payload(
            event,
            format!("expected {} as a string or integer, got {}", field, value_kind(&other)),
        )),
    }
}

/// Frames sent to clients
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    UserLoggedIn {
        identity: IdentityId,
        service_status: ServiceStatus,
    },
    CallIncoming(CallPayload),
    CallAccepted,
    CallRejected,
    CallEnded,
    CallTimedOut,
    CallBusy,
    CallOngoing,
    CallReconnected,
    CallWebrtcReady,
    ReceiveOffer(Value),
    ReceiveAnswer(Value),
    ReceiveCandidate(Value),
    UpdateMediaDevicesStatus(MediaDevicesStatus),
    CalleeStatus { busy: bool, ongoing: bool },
    SwitchToVideoRequested,
    SwitchToVideoAccepted,
    SwitchToVideoRejected,
}

impl OutboundFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundFrame::UserLoggedIn { .. } => names::USER_LOGGEDIN,
            OutboundFrame::CallIncoming(_) => names::CALL_INCOMING,
            OutboundFrame::CallAccepted => names::CALL_ACCEPTED,
            OutboundFrame::CallRejected => names::CALL_REJECTED,
            OutboundFrame::CallEnded => names::CALL_ENDED,
            OutboundFrame::CallTimedOut => names::CALL_TIMEDOUT,
            OutboundFrame::CallBusy => names::CALL_BUSY,
            OutboundFrame::CallOngoing => names::CALL_ONGOING,
            OutboundFrame::CallReconnected => names::CALL_RECONNECTED,
            OutboundFrame::CallWebrtcReady => names::CALL_WEBRTC_READY,
            OutboundFrame::ReceiveOffer(_) => names::CALL_RECEIVE_OFFER,
            OutboundFrame::ReceiveAnswer(_) => names::CALL_RECEIVE_ANSWER,
            OutboundFrame::ReceiveCandidate(_) => names::CALL_RECEIVE_CANDIDATE,
            OutboundFrame::UpdateMediaDevicesStatus(_) => names::CALL_UPDATE_MEDIA_DEVICES_STATUS,
            OutboundFrame::CalleeStatus { .. } => names::CALL_CALLEE_STATUS,
            OutboundFrame::SwitchToVideoRequested => names::CALL_SWITCH_TO_VIDEO_REQUESTED,
            OutboundFrame::SwitchToVideoAccepted => names::CALL_SWITCH_TO_VIDEO_ACCEPTED,
            OutboundFrame::SwitchToVideoRejected => names::CALL_SWITCH_TO_VIDEO_REJECTED,
        }
    }

    /// `data` member of the envelope
    pub fn data(&self) -> Value {
        match self {
            OutboundFrame::UserLoggedIn {
                identity,
                service_status,
            } => json!({ "identity": identity, "serviceStatus": service_status }),
            OutboundFrame::CallIncoming(payload) => json!(payload),
            OutboundFrame::ReceiveOffer(data)
            | OutboundFrame::ReceiveAnswer(data)
            | OutboundFrame::ReceiveCandidate(data) => data.clone(),
            OutboundFrame::UpdateMediaDevicesStatus(status) => json!(status),
            OutboundFrame::CalleeStatus { busy, ongoing } => json!({ "busy": busy, "ongoing": ongoing }),
            _ => Value::Null,
        }
    }

    /// Full envelope as a JSON value
    pub fn to_json(&self) -> Value {
        json!({ "event": self.event_name(), "data": self.data() })
    }

    /// Encode as frame text
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CallType;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_login_in_both_shapes() {
        let bare = InboundFrame::decode(r#"{"event":"callserver:user_login","data":"alice"}"#).unwrap();
        let object =
            InboundFrame::decode(r#"{"event":"callserver:user_login","data":{"identity":17}}"#).unwrap();
        assert_eq!(bare, InboundFrame::UserLogin { identity: "alice".into() });
        assert_eq!(object, InboundFrame::UserLogin { identity: "17".into() });
    }

    #[test]
    fn decodes_call_start_payload() {
        let frame = InboundFrame::decode(
            r#"{"event":"callserver:call_start","data":{"callerId":"alice","calleeId":"bob","callType":1}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::CallStart(payload) => {
                assert_eq!(payload.caller_id, "alice");
                assert_eq!(payload.call_type, CallType::Video);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn payloadless_events_ignore_data() {
        let frame =
            InboundFrame::decode(r#"{"event":"callserver:call_client_ready","data":{"x":1}}"#).unwrap();
        assert_eq!(frame, InboundFrame::CallClientReady);
        let frame = InboundFrame::decode(r#"{"event":"callserver:call_keepalive"}"#).unwrap();
        assert_eq!(frame, InboundFrame::CallKeepalive);
    }

    #[test]
    fn media_passthrough_is_kept_verbatim() {
        let frame = InboundFrame::decode(
            r#"{"event":"callserver:call_send_candidate","data":{"candidate":"a=1","sdpMid":"0"}}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            InboundFrame::SendCandidate(json!({"candidate": "a=1", "sdpMid": "0"}))
        );
    }

    #[test]
    fn rejects_malformed_and_unknown_frames() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"event":"callserver:nope"}"#),
            Err(ProtocolError::UnknownEvent { .. })
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"event":"callserver:user_login","data":{"identity":[1]}}"#),
            Err(ProtocolError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn encodes_outbound_envelopes() {
        let frame = OutboundFrame::CalleeStatus {
            busy: true,
            ongoing: false,
        };
        assert_eq!(
            frame.to_json(),
            json!({"event": "callserver:call_callee_status", "data": {"busy": true, "ongoing": false}})
        );
        assert_eq!(
            OutboundFrame::CallTimedOut.to_json(),
            json!({"event": "callserver:call_timeout", "data": null})
        );
    }

    #[test]
    fn logged_in_frame_carries_service_status() {
        let frame = OutboundFrame::UserLoggedIn {
            identity: "alice".into(),
            service_status: ServiceStatus {
                sfu_available: true,
                sfu_load: "3/500".to_string(),
            },
        };
        assert_eq!(
            frame.data(),
            json!({"identity": "alice", "serviceStatus": {"sfuAvailable": true, "sfuLoad": "3/500"}})
        );
    }
}
