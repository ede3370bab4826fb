use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::vec3::Vec3;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Opaque per-connection identity. Allocated once per connection and never
/// handed out again for the lifetime of the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(transparent)]
pub struct ConnectionId(pub u32);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// === Server -> Client ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "event", content = "data")]
pub enum ServerMsg {
    #[serde(rename = "welcome")]
    Welcome(WelcomeMsg),
    #[serde(rename = "userList")]
    UserList(Vec<String>),
    #[serde(rename = "chatMessage")]
    ChatMessage(String),
    #[serde(rename = "chatBubble")]
    ChatBubble(ChatBubbleMsg),
    #[serde(rename = "existing-users")]
    ExistingUsers(Vec<UserState>),
    #[serde(rename = "user-joined")]
    UserJoined(UserState),
    #[serde(rename = "user-moved")]
    UserMoved(UserMovedMsg),
    #[serde(rename = "user-left")]
    UserLeft(UserLeftMsg),
    #[serde(rename = "join-rejected")]
    JoinRejected(JoinRejectedMsg),
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMsg {
    /// Wire event name, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMsg::Welcome(_) => "welcome",
            ServerMsg::UserList(_) => "userList",
            ServerMsg::ChatMessage(_) => "chatMessage",
            ServerMsg::ChatBubble(_) => "chatBubble",
            ServerMsg::ExistingUsers(_) => "existing-users",
            ServerMsg::UserJoined(_) => "user-joined",
            ServerMsg::UserMoved(_) => "user-moved",
            ServerMsg::UserLeft(_) => "user-left",
            ServerMsg::JoinRejected(_) => "join-rejected",
            ServerMsg::Pong => "pong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct WelcomeMsg {
    pub protocol_version: u32,
    pub user_id: ConnectionId,
}

/// Everything a peer needs to draw someone's avatar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub user_id: ConnectionId,
    pub username: String,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ChatBubbleMsg {
    pub username: String,
    pub user_id: ConnectionId,
    pub message: String,
    /// Unix epoch milliseconds at which the server relayed the message
    #[ts(type = "number")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct UserMovedMsg {
    pub user_id: ConnectionId,
    pub position: Vec3,
    pub rotation: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct UserLeftMsg {
    pub user_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
pub struct JoinRejectedMsg {
    pub reason: String,
}

// === Client -> Server ===

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "event", content = "data")]
pub enum ClientMsg {
    #[serde(rename = "join")]
    Join(String),
    #[serde(rename = "chatMessage")]
    ChatMessage(String),
    #[serde(rename = "position-update")]
    PositionUpdate(PositionUpdateMsg),
    #[serde(rename = "ping")]
    Ping,
}

/// Movement sample as sent by a client.
///
/// Coordinates are kept as raw JSON so that the server can coerce sloppy
/// input (strings, nulls, missing axes) instead of rejecting the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
pub struct PositionUpdateMsg {
    #[serde(default)]
    #[ts(type = "{ x: number, y: number, z: number } | undefined")]
    pub position: Option<Value>,
    #[serde(default)]
    #[ts(type = "{ x: number, y: number, z: number } | undefined")]
    pub rotation: Option<Value>,
}

impl PositionUpdateMsg {
    pub fn new(position: Vec3, rotation: Vec3) -> Self {
        Self {
            position: serde_json::to_value(position).ok(),
            rotation: serde_json::to_value(rotation).ok(),
        }
    }
}

// === Conversion helpers ===

/// Round to 2 decimal places, the precision clients sample at.
#[inline]
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
