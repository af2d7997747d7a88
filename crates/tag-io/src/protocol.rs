use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

/// One broadcast event as streamed to bridge subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
    pub event: String,
    pub data: serde_json::Value,
}

impl NotificationMsg {
    pub fn new(sequence: u64, unix_us: u64, event: &str, data: serde_json::Value) -> Self {
        Self {
            msg_type: "notification".to_string(),
            protocol_version: ProtocolVersion::v1(),
            sequence,
            unix_us,
            event: event.to_string(),
            data,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HelloMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Events to receive; empty means all.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PingMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub sequence: u64,
}

#[derive(Debug, Serialize)]
pub struct PongMsg {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    pub sequence: u64,
    pub unix_us: u64,
}

#[derive(Debug)]
pub enum IncomingMessage {
    Hello(HelloMsg),
    Ping(PingMsg),
}

impl IncomingMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(line).ok()?;
        let msg_type = value.get("type")?.as_str()?;
        match msg_type {
            "hello" => serde_json::from_value(value).ok().map(IncomingMessage::Hello),
            "ping" => serde_json::from_value(value).ok().map(IncomingMessage::Ping),
            _ => None,
        }
    }
}
