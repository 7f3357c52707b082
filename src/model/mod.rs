//! 领域数据模型：实体状态、头像描述符、消息类型与事件载荷

pub mod avatar;
pub mod events;
pub mod state;

pub use avatar::{AvatarDescriptor, Frameset, MotionCode};
pub use events::{
    AuthAck, AuthRequest, AvatarChange, AvatarRequest, ChatSay, ErrEvent, JoinRequest,
    MemberJoin, MemberLeave, MessageKind, MoveRequest, MoveUpdate, NameChange, NameRequest,
    SayRequest, TypingPing, EVENT_AUTH, EVENT_AVATAR, EVENT_ERR, EVENT_JOIN, EVENT_LEAVE,
    EVENT_MOVE, EVENT_NAME, EVENT_SAY, EVENT_TYPING,
};
pub use state::EntityState;

/// 会话 ID（由传输层在连接建立时分配，进程生命周期内唯一）
pub type SessionId = String;
