/// Wire frames pushed to connected clients
use serde::Serialize;

/// Payload a client must send back after every frame
pub const ACK_PAYLOAD: &[u8] = b"received";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PushFrame {
    /// A notification delivery
    Message { message: String },

    /// Liveness probe
    Ping { ping: String },
}

impl PushFrame {
    pub fn message(text: impl Into<String>) -> Self {
        PushFrame::Message {
            message: text.into(),
        }
    }

    pub fn ping() -> Self {
        PushFrame::Ping {
            ping: String::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Whether a client reply is exactly the expected acknowledgement
pub fn is_ack(payload: &[u8]) -> bool {
    payload == ACK_PAYLOAD
}
