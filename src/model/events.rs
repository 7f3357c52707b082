use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;
use crate::model::{AvatarDescriptor, EntityState, SessionId};

/// 出站事件名
pub const EVENT_AUTH: &str = "auth";
pub const EVENT_JOIN: &str = "join";
pub const EVENT_LEAVE: &str = "leave";
pub const EVENT_NAME: &str = "name";
pub const EVENT_TYPING: &str = "typing";
pub const EVENT_SAY: &str = "say";
pub const EVENT_MOVE: &str = "move";
pub const EVENT_AVATAR: &str = "avatar";
pub const EVENT_ERR: &str = "err";

/// 入站消息类型，封闭枚举
///
/// 分发表的键：每个类型对应一个处理器，不存在动态注册。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Auth,
    Join,
    Name,
    Typing,
    Say,
    Move,
    Avatar,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::Auth,
        MessageKind::Join,
        MessageKind::Name,
        MessageKind::Typing,
        MessageKind::Say,
        MessageKind::Move,
        MessageKind::Avatar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Auth => "auth",
            MessageKind::Join => "join",
            MessageKind::Name => "name",
            MessageKind::Typing => "typing",
            MessageKind::Say => "say",
            MessageKind::Move => "move",
            MessageKind::Avatar => "avatar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------- 入站载荷 ----------

/// auth 请求。除 token 外都是可选项，缺省时沿用会话当前值。
#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequest {
    pub token: String,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<AvatarDescriptor>,
    #[serde(default)]
    pub state: Option<EntityState>,
}

/// join 请求
#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub room: String,
}

/// name 请求
#[derive(Debug, Clone, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

/// say 请求
#[derive(Debug, Clone, Deserialize)]
pub struct SayRequest {
    pub message: String,
}

/// move 请求。buffer 是客户端侧重放用的不透明 token，服务器不做解释。
#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub buffer: Value,
    pub state: EntityState,
}

/// avatar 请求
#[derive(Debug, Clone, Deserialize)]
pub struct AvatarRequest {
    pub metadata: AvatarDescriptor,
}

// ---------- 出站事件 ----------

/// auth 确认，仅发给发起方
#[derive(Debug, Clone, Serialize)]
pub struct AuthAck {
    pub id: SessionId,
    pub room: Option<String>,
}

/// join 事件：既用于给新加入者的存量成员快照，也用于全房间广播
#[derive(Debug, Clone, Serialize)]
pub struct MemberJoin {
    pub id: SessionId,
    pub name: String,
    pub avatar: Option<AvatarDescriptor>,
    pub state: EntityState,
}

/// leave 事件
#[derive(Debug, Clone, Serialize)]
pub struct MemberLeave {
    pub id: SessionId,
}

/// name 变更事件
#[derive(Debug, Clone, Serialize)]
pub struct NameChange {
    pub id: SessionId,
    pub name: String,
}

/// typing 提示事件
#[derive(Debug, Clone, Serialize)]
pub struct TypingPing {
    pub id: SessionId,
}

/// say 聊天事件
#[derive(Debug, Clone, Serialize)]
pub struct ChatSay {
    pub id: SessionId,
    pub message: String,
}

/// move 事件，buffer 原样透传
#[derive(Debug, Clone, Serialize)]
pub struct MoveUpdate {
    pub id: SessionId,
    pub buffer: Value,
    pub state: EntityState,
}

/// avatar 变更事件
#[derive(Debug, Clone, Serialize)]
pub struct AvatarChange {
    pub id: SessionId,
    pub metadata: AvatarDescriptor,
}

/// 错误事件，只发给出错消息的发起方
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrEvent {
    pub response_to: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
}

impl ErrEvent {
    /// 把核心错误映射成对客户端可见的错误事件
    pub fn from_error(err: &RelayError) -> Self {
        match err {
            RelayError::Auth(msg) => Self {
                response_to: Some(EVENT_AUTH.to_string()),
                message: "Invalid token".to_string(),
                developer_message: Some(msg.clone()),
            },
            RelayError::UnknownMessageKind(kind) => Self {
                response_to: Some(kind.clone()),
                message: "Unknown message type".to_string(),
                developer_message: Some(format!(
                    "No schema registered for message kind [{}]",
                    kind
                )),
            },
            RelayError::SchemaViolation { kind, violations } => Self {
                response_to: Some(kind.clone()),
                message: "Malformed message".to_string(),
                developer_message: Some(violations.join("; ")),
            },
            RelayError::MalformedPayload { kind, detail } => Self {
                response_to: Some(kind.clone()),
                message: "Malformed message".to_string(),
                developer_message: Some(detail.clone()),
            },
            RelayError::RateLimited { kind, message } => Self {
                response_to: Some(kind.clone()),
                message: message.clone(),
                developer_message: Some(format!("Rate limit exceeded for [{}]", kind)),
            },
            other => Self {
                response_to: None,
                message: "Internal error".to_string(),
                developer_message: Some(other.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(MessageKind::parse("say"), Some(MessageKind::Say));
        assert_eq!(MessageKind::parse("shout"), None);
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_err_event_wire_shape() {
        let err = RelayError::MalformedPayload {
            kind: "say".to_string(),
            detail: "Expected string. Got [number]".to_string(),
        };
        let value = serde_json::to_value(ErrEvent::from_error(&err)).unwrap();

        // 线上字段名是 camelCase
        assert_eq!(value["responseTo"], "say");
        assert_eq!(value["message"], "Malformed message");
        assert_eq!(value["developerMessage"], "Expected string. Got [number]");
    }

    #[test]
    fn test_rate_limited_uses_configured_message() {
        let err = RelayError::RateLimited {
            kind: "avatar".to_string(),
            message: "Who are you, Arturo Brachetti?".to_string(),
        };
        let ev = ErrEvent::from_error(&err);
        assert_eq!(ev.response_to.as_deref(), Some("avatar"));
        assert_eq!(ev.message, "Who are you, Arturo Brachetti?");
    }
}
