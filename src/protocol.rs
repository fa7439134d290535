//! 线路协议：入站信封、条目模型和出站控制消息。
//! Wire protocol: inbound envelopes, the entry model, and outbound control messages.
//!
//! Inbound frames are JSON envelopes `{ "event": <kind>, "data": <payload> }`.
//! Decoding happens in two steps so that an unknown kind is not a decode error.
//!
//! 入站帧是 JSON 信封。解码分两步进行，使未知类型不会成为解码错误。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt};

/// Event kinds carried in the `event` field.
pub mod kind {
    pub const CONNECTED: &str = "connected";
    pub const ENTRY_CREATED: &str = "entry-created";
    pub const ENTRY_REMOVED: &str = "entry-removed";
    pub const ENTRY_REACTION_CHANGED: &str = "entry-reaction-changed";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}

/// The identity of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One unit of distributed content.
///
/// Only the fields this layer touches are typed; everything else the server
/// sends is kept verbatim in `extra` so stores can hand it to renderers.
///
/// 一个分发内容单元。只对本层使用的字段进行类型化；其余字段原样保存在 `extra` 中。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Reaction kind to count.
    #[serde(default)]
    pub reactions: BTreeMap<String, u64>,
    /// Reaction kind to the asset used to display it.
    #[serde(default)]
    pub reaction_assets: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entry {
    /// Creates a bare entry with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(id),
            created_at: None,
            user_id: None,
            text: None,
            reactions: BTreeMap::new(),
            reaction_assets: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

/// Whether a reaction was added or withdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

/// A reaction change on an existing entry.
///
/// 现有条目上的反应变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdate {
    pub id: EntryId,
    pub reaction_kind: String,
    pub action: ReactionAction,
    /// Authoritative counts, when the server sends them.
    #[serde(default)]
    pub counts: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    pub display_assets: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RemovedPayload {
    id: EntryId,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// A decoded inbound message.
///
/// 已解码的入站消息。
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Application-level acknowledgement that the channel is live.
    /// 应用层确认通道已就绪。
    Connected,
    EntryCreated(Entry),
    EntryRemoved(EntryId),
    EntryReactionChanged(ReactionUpdate),
    /// `heartbeat` or `pong`; carries no state.
    /// `heartbeat` 或 `pong`；不携带状态。
    Liveness,
    /// Diagnostic error reported by the server.
    /// 服务器报告的诊断错误。
    ServerError(Value),
    /// A kind this client does not know. Ignored.
    /// 本客户端不认识的类型，忽略。
    Unknown(String),
}

impl InboundMessage {
    /// Decodes one text frame.
    ///
    /// 解码一个文本帧。
    pub fn decode(text: &str) -> Result<Self> {
        let Envelope { event, data } = serde_json::from_str(text)?;
        let message = match event.as_str() {
            kind::CONNECTED => InboundMessage::Connected,
            kind::ENTRY_CREATED => InboundMessage::EntryCreated(serde_json::from_value(data)?),
            kind::ENTRY_REMOVED => {
                let RemovedPayload { id } = serde_json::from_value(data)?;
                InboundMessage::EntryRemoved(id)
            }
            kind::ENTRY_REACTION_CHANGED => {
                InboundMessage::EntryReactionChanged(serde_json::from_value(data)?)
            }
            kind::HEARTBEAT | kind::PONG => InboundMessage::Liveness,
            kind::ERROR => InboundMessage::ServerError(data),
            _ => InboundMessage::Unknown(event),
        };
        Ok(message)
    }

    /// Short name for logging.
    pub fn kind_name(&self) -> &str {
        match self {
            InboundMessage::Connected => kind::CONNECTED,
            InboundMessage::EntryCreated(_) => kind::ENTRY_CREATED,
            InboundMessage::EntryRemoved(_) => kind::ENTRY_REMOVED,
            InboundMessage::EntryReactionChanged(_) => kind::ENTRY_REACTION_CHANGED,
            InboundMessage::Liveness => kind::HEARTBEAT,
            InboundMessage::ServerError(_) => kind::ERROR,
            InboundMessage::Unknown(event) => event,
        }
    }
}

/// Control messages sent to the server.
///
/// 发送到服务器的控制消息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Ping,
}

impl OutboundMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
