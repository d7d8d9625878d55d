use serde::Deserialize;
use serde_json::{json, Map, Value};
use serenity::all::{GatewayIntents, OnlineStatus};

use crate::gateway::state::GatewayState;

pub const GATEWAY_VERSION: u8 = 6;

/// ゲートウェイのopcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GatewayOp {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Presence = 3,
    VoiceState = 4,
    VoicePing = 5,
    Resume = 6,
    Reconnect = 7,
    RequestMembers = 8,
    InvalidateSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
    GuildSync = 12,
}

impl GatewayOp {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u64> for GatewayOp {
    type Error = u64;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let op = match value {
            0 => GatewayOp::Dispatch,
            1 => GatewayOp::Heartbeat,
            2 => GatewayOp::Identify,
            3 => GatewayOp::Presence,
            4 => GatewayOp::VoiceState,
            5 => GatewayOp::VoicePing,
            6 => GatewayOp::Resume,
            7 => GatewayOp::Reconnect,
            8 => GatewayOp::RequestMembers,
            9 => GatewayOp::InvalidateSession,
            10 => GatewayOp::Hello,
            11 => GatewayOp::HeartbeatAck,
            12 => GatewayOp::GuildSync,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// 受信したフレーム
#[derive(Debug, Deserialize)]
pub struct GatewayFrame {
    pub op: u64,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

/// IDENTIFYに含める接続設定
#[derive(Debug, Clone, Copy)]
pub struct IdentifyOptions {
    pub intents: Option<GatewayIntents>,
    pub large_threshold: u32,
}

impl Default for IdentifyOptions {
    fn default() -> Self {
        Self { intents: None, large_threshold: 250 }
    }
}

/// ステータス変更の内容。Noneの項目は送信しません。
#[derive(Debug, Clone, Default)]
pub struct Presence {
    pub status: Option<OnlineStatus>,
    pub activity: Option<Activity>,
    pub afk: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub name: String,
    pub kind: u8,
    pub url: Option<String>,
}

impl Activity {
    pub fn playing(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: 0, url: None }
    }

    pub fn streaming(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { name: name.into(), kind: 1, url: Some(url.into()) }
    }
}

pub fn identify(state: &GatewayState, options: &IdentifyOptions) -> Value {
    let mut d = json!({
        "token": state.token,
        "properties": {
            "$os": std::env::consts::OS,
            "$browser": "shardbot",
            "$device": "shardbot",
            "$referrer": "",
            "$referring_domain": ""
        },
        "large_threshold": options.large_threshold,
        "v": GATEWAY_VERSION,
        "shard": [state.shard_id, state.shard_count]
    });

    if let Some(intents) = options.intents {
        d["intents"] = json!(intents.bits());
    }

    json!({ "op": GatewayOp::Identify.code(), "d": d })
}

pub fn heartbeat(sequence: Option<u64>) -> Value {
    json!({ "op": GatewayOp::Heartbeat.code(), "d": sequence })
}

pub fn resume(state: &GatewayState) -> Value {
    json!({
        "op": GatewayOp::Resume.code(),
        "d": {
            "token": state.token,
            "session_id": state.session_id,
            "seq": state.sequence
        }
    })
}

pub fn request_guild_members(guild_id: u64) -> Value {
    json!({
        "op": GatewayOp::RequestMembers.code(),
        "d": {
            "guild_id": [guild_id.to_string()],
            "query": "",
            "limit": 0
        }
    })
}

/// PRESENCE_UPDATE。`now_ms`はafk指定時のsinceに使われます。
pub fn presence(presence: &Presence, now_ms: i64) -> Value {
    let mut d = Map::new();

    if let Some(status) = &presence.status {
        d.insert("status".into(), json!(status.name()));
    }

    if let Some(activity) = &presence.activity {
        let mut game = json!({ "name": activity.name, "type": activity.kind });
        if let Some(url) = &activity.url {
            game["url"] = json!(url);
        }
        d.insert("game".into(), game);
    }

    if let Some(afk) = presence.afk {
        d.insert("afk".into(), json!(afk));
        d.insert("since".into(), json!(now_ms));
    }

    json!({ "op": GatewayOp::Presence.code(), "d": Value::Object(d) })
}
