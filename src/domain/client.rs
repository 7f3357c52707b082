use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::RelayError;
use crate::model::{
    AvatarDescriptor, EntityState, ErrEvent, MemberJoin, MessageKind, SessionId, EVENT_ERR,
};
use crate::security::FloodCounter;
use crate::transport::EventSink;

/// 会话所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// 已连接，token 还没对上
    Unauthenticated,
    /// 认证通过
    Authenticated,
    /// 已断开，终态，没有出边
    Terminated,
}

/// 单条连接的服务端会话
///
/// 归属且仅归属一个 Domain，随断开一起销毁 —— 房间成员关系和
/// 洪水计数都不落盘。字段变更只发生在域锁之内。
pub struct ClientSession {
    /// 传输层分配的连接 id，进程生命周期内唯一
    pub id: SessionId,
    /// 当前房间，同一时刻至多一个
    pub room: Option<String>,
    /// 显示名，默认占位 "Guest"
    pub name: String,
    /// 头像描述符，空表示还没设置
    pub avatar: Option<AvatarDescriptor>,
    /// 状态向量 `[x, y, z, direction, action]`
    pub state: EntityState,
    pub phase: SessionPhase,
    pub connected_at: DateTime<Utc>,
    pub remote_addr: Option<SocketAddr>,
    /// 洪水计数器。只为实际发送过的受管制类型建条目。
    pub flood_counters: HashMap<MessageKind, FloodCounter>,
    sink: Arc<dyn EventSink>,
}

impl ClientSession {
    pub fn new(id: SessionId, remote_addr: Option<SocketAddr>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            id,
            room: None,
            name: "Guest".to_string(),
            avatar: None,
            state: EntityState::default(),
            phase: SessionPhase::Unauthenticated,
            connected_at: Utc::now(),
            remote_addr,
            flood_counters: HashMap::new(),
            sink,
        }
    }

    /// 向本会话投递一个事件（尽力而为，不阻塞）
    pub fn emit(&self, event: &str, payload: Value) {
        self.sink.emit(event, payload);
    }

    /// 把核心错误作为 err 事件回给本会话。错误永远只回给发起方。
    pub fn emit_err(&self, err: &RelayError) {
        let payload = serde_json::to_value(ErrEvent::from_error(err)).unwrap_or_default();
        self.sink.emit(EVENT_ERR, payload);
    }

    /// 本会话的 join 快照条目：名字、头像、状态的时点拷贝
    pub fn join_entry(&self) -> MemberJoin {
        MemberJoin {
            id: self.id.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            state: self.state,
        }
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }
}
