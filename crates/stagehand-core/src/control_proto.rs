use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const RPC_VERSION: u32 = 1;
/// Remote status code for "resource already exists".
pub const STATUS_RESOURCE_ALREADY_EXISTS: i64 = 601;
pub const BROWSER_SOURCE_KIND: &str = "browser_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    HelloAck,
    Announce,
    Identified,
    Event,
    Request,
    Response,
    Other(u8),
}

impl OpCode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => OpCode::HelloAck,
            1 => OpCode::Announce,
            2 => OpCode::Identified,
            5 => OpCode::Event,
            6 => OpCode::Request,
            7 => OpCode::Response,
            other => OpCode::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::HelloAck => 0,
            OpCode::Announce => 1,
            OpCode::Identified => 2,
            OpCode::Event => 5,
            OpCode::Request => 6,
            OpCode::Response => 7,
            OpCode::Other(value) => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    GetSceneList,
    CreateScene,
    SetCurrentProgramScene,
    CreateInput,
    GetSceneItemList,
    SetSceneItemTransform,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::GetSceneList => "GetSceneList",
            RequestType::CreateScene => "CreateScene",
            RequestType::SetCurrentProgramScene => "SetCurrentProgramScene",
            RequestType::CreateInput => "CreateInput",
            RequestType::GetSceneItemList => "GetSceneItemList",
            RequestType::SetSceneItemTransform => "SetSceneItemTransform",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw `{"op": n, "d": {...}}` frame as carried in one text message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Announce {
    pub rpc_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_subscriptions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    pub rpc_version: u32,
    #[serde(default, rename = "obsWebSocketVersion", skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    pub request_type: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestStatus {
    pub result: bool,
    #[serde(default)]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    #[serde(default)]
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    HelloAck(HelloAck),
    Announce(Announce),
    Identified(Value),
    Event(Value),
    Request(RequestFrame),
    Response(ResponseFrame),
    Other(RawFrame),
}

impl ControlMsg {
    pub fn opcode(&self) -> OpCode {
        match self {
            ControlMsg::HelloAck(_) => OpCode::HelloAck,
            ControlMsg::Announce(_) => OpCode::Announce,
            ControlMsg::Identified(_) => OpCode::Identified,
            ControlMsg::Event(_) => OpCode::Event,
            ControlMsg::Request(_) => OpCode::Request,
            ControlMsg::Response(_) => OpCode::Response,
            ControlMsg::Other(raw) => OpCode::Other(raw.op),
        }
    }

    pub fn into_raw(self) -> Result<RawFrame, FrameError> {
        let op = self.opcode().as_u8();
        let d = match self {
            ControlMsg::HelloAck(payload) => to_value(&payload)?,
            ControlMsg::Announce(payload) => to_value(&payload)?,
            ControlMsg::Identified(value) | ControlMsg::Event(value) => value,
            ControlMsg::Request(payload) => to_value(&payload)?,
            ControlMsg::Response(payload) => to_value(&payload)?,
            ControlMsg::Other(raw) => return Ok(raw),
        };
        Ok(RawFrame { op, d })
    }

    pub fn from_raw(raw: RawFrame) -> Result<Self, FrameError> {
        let msg = match OpCode::from_u8(raw.op) {
            OpCode::HelloAck => ControlMsg::HelloAck(from_value(raw.d)?),
            OpCode::Announce => ControlMsg::Announce(from_value(raw.d)?),
            OpCode::Identified => ControlMsg::Identified(raw.d),
            OpCode::Event => ControlMsg::Event(raw.d),
            OpCode::Request => ControlMsg::Request(from_value(raw.d)?),
            OpCode::Response => ControlMsg::Response(from_value(raw.d)?),
            OpCode::Other(_) => ControlMsg::Other(raw),
        };
        Ok(msg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, FrameError> {
    serde_json::to_value(value).map_err(|err| FrameError::Encode(err.to_string()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, FrameError> {
    serde_json::from_value(value).map_err(|err| FrameError::Decode(err.to_string()))
}

pub fn encode_frame(msg: ControlMsg, max_frame_bytes: usize) -> Result<String, FrameError> {
    let raw = msg.into_raw()?;
    let encoded = serde_json::to_string(&raw).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_frame(text: &str, max_frame_bytes: usize) -> Result<ControlMsg, FrameError> {
    if text.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: text.len(),
            max: max_frame_bytes,
        });
    }
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|err| FrameError::Decode(err.to_string()))?;
    ControlMsg::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn announce_encodes_with_opcode_one() {
        let frame = encode_frame(
            ControlMsg::Announce(Announce {
                rpc_version: RPC_VERSION,
                authentication: None,
                event_subscriptions: Some(0),
            }),
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("encode");
        let value: Value = serde_json::from_str(&frame).expect("json");
        assert_eq!(value, json!({"op": 1, "d": {"rpcVersion": 1, "eventSubscriptions": 0}}));
    }

    #[test]
    fn request_round_trips_through_raw_frame() {
        let request = ControlMsg::Request(RequestFrame {
            request_type: RequestType::CreateScene.to_string(),
            request_id: "stagehand-3".to_string(),
            request_data: Some(json!({"sceneName": "Live Room Wall"})),
        });
        let frame = encode_frame(request.clone(), DEFAULT_MAX_FRAME_BYTES).expect("encode");
        assert!(frame.contains("\"requestType\":\"CreateScene\""));
        let decoded = decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn decodes_hello_ack_with_challenge() {
        let text = r#"{"op":0,"d":{"obsWebSocketVersion":"5.4.2","rpcVersion":1,
            "authentication":{"challenge":"c","salt":"s"}}}"#;
        let ControlMsg::HelloAck(ack) = decode_frame(text, DEFAULT_MAX_FRAME_BYTES).expect("decode")
        else {
            panic!("expected hello ack")
        };
        assert_eq!(ack.rpc_version, 1);
        assert_eq!(ack.server_version.as_deref(), Some("5.4.2"));
        assert_eq!(ack.authentication.map(|auth| auth.salt), Some("s".to_string()));
    }

    #[test]
    fn decodes_failed_response_with_comment() {
        let text = r#"{"op":7,"d":{"requestType":"CreateInput","requestId":"stagehand-9",
            "requestStatus":{"result":false,"code":601,"comment":"exists"}}}"#;
        let ControlMsg::Response(response) =
            decode_frame(text, DEFAULT_MAX_FRAME_BYTES).expect("decode")
        else {
            panic!("expected response")
        };
        assert!(!response.request_status.result);
        assert_eq!(response.request_status.code, STATUS_RESOURCE_ALREADY_EXISTS);
        assert_eq!(response.response_data, None);
    }

    #[test]
    fn event_and_unknown_opcodes_are_preserved() {
        let event = decode_frame(r#"{"op":5,"d":{"eventType":"SceneCreated"}}"#, 1024)
            .expect("event");
        assert_eq!(event.opcode(), OpCode::Event);
        let other = decode_frame(r#"{"op":9,"d":{}}"#, 1024).expect("other");
        assert_eq!(other.opcode(), OpCode::Other(9));
    }

    #[test]
    fn malformed_frames_are_decode_errors() {
        assert!(matches!(
            decode_frame("{\"op\":", 1024),
            Err(FrameError::Decode(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"op":0,"d":{"rpcVersion":"one"}}"#, 1024),
            Err(FrameError::Decode(_))
        ));
    }

    #[test]
    fn oversized_frames_are_rejected_both_ways() {
        let request = ControlMsg::Request(RequestFrame {
            request_type: "CreateInput".to_string(),
            request_id: "stagehand-1".to_string(),
            request_data: Some(json!({"blob": "x".repeat(128)})),
        });
        assert!(matches!(
            encode_frame(request, 64),
            Err(FrameError::OversizedFrame { .. })
        ));
        let long = format!("{{\"op\":5,\"d\":{{\"blob\":\"{}\"}}}}", "x".repeat(2_000));
        assert!(matches!(
            decode_frame(&long, 1_024),
            Err(FrameError::OversizedFrame { .. })
        ));
    }
}
