//! Call invitation payload
//!
//! Every call-control frame carries a [`CallPayload`]. Clients are loose about
//! its shape: fields go missing and ids arrive as numbers. Parsing fills in
//! defaults and coerces numeric ids to strings, but rejects values that cannot
//! be coerced (an object where an id belongs, an unknown call type).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::types::{CallProtocol, CallType, IdentityId, RoomId};

/// Immutable description of a call invitation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub room_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub room_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub room_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub caller_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub caller_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub caller_avatar: String,
    #[serde(deserialize_with = "lenient_string")]
    pub callee_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub callee_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub callee_avatar: String,
    pub call_type: CallType,
    #[serde(deserialize_with = "lenient_protocol")]
    pub call_protocol: CallProtocol,
}

impl CallPayload {
    /// Parse a payload out of frame data for `event`
    pub fn parse(event: &str, data: &Value) -> Result<Self, ProtocolError> {
        if !data.is_object() {
            return Err(ProtocolError::invalid_payload(
                event,
                format!("expected an object, got {}", value_kind(data)),
            ));
        }
        CallPayload::deserialize(data).map_err(|e| ProtocolError::invalid_payload(event, e))
    }

    /// Build a payload for a plain call between two identities
    pub fn between(caller: &IdentityId, callee: &IdentityId, call_type: CallType) -> Self {
        Self {
            room_id: caller.0.clone(),
            caller_id: caller.0.clone(),
            callee_id: callee.0.clone(),
            call_type,
            ..Default::default()
        }
    }

    pub fn caller(&self) -> IdentityId {
        IdentityId::new(self.caller_id.trim())
    }

    pub fn callee(&self) -> IdentityId {
        IdentityId::new(self.callee_id.trim())
    }

    /// Room this payload refers to, if it names one
    pub fn room(&self) -> Option<RoomId> {
        let room = RoomId::new(self.room_id.trim());
        (!room.is_empty()).then_some(room)
    }

    /// Both ends of the call must be named
    pub fn require_parties(&self) -> Result<(IdentityId, IdentityId), ProtocolError> {
        let caller = self.caller();
        if caller.is_empty() {
            return Err(ProtocolError::missing_id("callerId"));
        }
        let callee = self.callee();
        if callee.is_empty() {
            return Err(ProtocolError::missing_id("calleeId"));
        }
        Ok((caller, callee))
    }
}

/// Accepts strings, integers and null; anything else is a parse error
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or integer, got {}",
            value_kind(&other)
        ))),
    }
}

fn lenient_protocol<'de, D>(deserializer: D) -> Result<CallProtocol, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(CallProtocol::default()),
        Value::String(s) if s.is_empty() => Ok(CallProtocol::default()),
        Value::String(s) => match s.as_str() {
            "peers" => Ok(CallProtocol::Peers),
            "sfu" => Ok(CallProtocol::Sfu),
            _ => Err(D::Error::custom(format!("unknown call protocol: {}", s))),
        },
        other => Err(D::Error::custom(format!(
            "expected a call protocol string, got {}",
            value_kind(&other)
        ))),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
