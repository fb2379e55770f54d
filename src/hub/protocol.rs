use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames larger than this are refused before any parse attempt.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

pub fn is_valid_username(name: &str) -> bool {
    (3..=32).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Browser → hub frames. `hang-up` is accepted as a spelling of
/// `hangup`; the payload is identical.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Register {
        username: String,
    },
    CallRequest {
        to: String,
        #[serde(default)]
        sdp: Option<Value>,
        #[serde(default)]
        data: Option<Value>,
    },
    CallResponse {
        #[serde(default)]
        to: Option<String>,
        accepted: bool,
        #[serde(default, rename = "call-id")]
        call_id: Option<String>,
    },
    Offer {
        to: String,
        data: Value,
    },
    Answer {
        #[serde(default)]
        to: Option<String>,
        data: Value,
    },
    IceCandidate {
        to: String,
        data: Value,
    },
    #[serde(alias = "hang-up")]
    Hangup {
        #[serde(default)]
        to: Option<String>,
        #[serde(default, rename = "call-id")]
        call_id: Option<String>,
    },
    Reject {
        #[serde(default)]
        to: Option<String>,
        #[serde(default, rename = "call-id")]
        call_id: Option<String>,
    },
}

/// Hub → browser frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Connected,
    Registered {
        username: String,
    },
    UserList {
        users: Vec<String>,
    },
    UserJoined {
        username: String,
    },
    UserLeft {
        username: String,
    },
    IncomingCall {
        from: String,
        #[serde(rename = "call-id")]
        call_id: String,
        sdp: String,
    },
    CallRinging {
        #[serde(rename = "call-id")]
        call_id: String,
    },
    CallAnswered {
        #[serde(rename = "call-id")]
        call_id: String,
        sdp: String,
    },
    CallFailed {
        #[serde(rename = "call-id")]
        call_id: String,
        reason: String,
    },
    CallEnded {
        #[serde(rename = "call-id")]
        call_id: String,
        reason: String,
    },
    CallRejected {
        from: String,
    },
    MediaRenegotiation {
        #[serde(rename = "call-id")]
        call_id: String,
        sdp: String,
    },
    Dtmf {
        #[serde(rename = "call-id")]
        call_id: String,
        digit: String,
        duration: u32,
    },
    Error {
        message: String,
    },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"type\":\"error\"}".to_string())
    }
}
