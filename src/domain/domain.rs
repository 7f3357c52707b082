use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::client::{ClientSession, SessionPhase};
use crate::error::RelayError;
use crate::metrics;
use crate::model::{
    AuthAck, AuthRequest, AvatarChange, AvatarDescriptor, AvatarRequest, ChatSay, EntityState,
    JoinRequest, MemberLeave, MessageKind, MoveRequest, MoveUpdate, NameChange, NameRequest,
    SayRequest, SessionId, TypingPing, EVENT_AUTH, EVENT_AVATAR, EVENT_JOIN, EVENT_LEAVE,
    EVENT_MOVE, EVENT_NAME, EVENT_SAY, EVENT_TYPING,
};
use crate::schema::{self, MessageValidator};
use crate::security::{FloodDecision, FloodGuard};
use crate::transport::EventSink;

/// 广播受众
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// 仅发起方自己
    SelfOnly,
    /// 房间内除发起方外的所有会话
    RoomExceptSelf,
    /// 房间内包括发起方在内的所有会话
    RoomIncludingSelf,
}

/// 会话信息的只读快照，供健康检查和测试观察用
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub room: Option<String>,
    pub name: String,
    pub avatar: Option<AvatarDescriptor>,
    pub state: EntityState,
    pub phase: SessionPhase,
    pub connected_at: DateTime<Utc>,
}

/// 租户域
///
/// 一个命名空间内的会话注册表与广播扇出。域在进程启动时创建，
/// 存活到进程结束；运行期不增减。
pub struct Domain {
    /// 域 id，等于命名空间键
    id: String,
    /// 租户标识，仅作展示
    tenant: String,
    /// 占位认证口令（纯相等比较）
    auth_token: String,
    validator: Arc<MessageValidator>,
    flood_guard: Arc<FloodGuard>,
    /// 会话注册表。每条入站事件的 校验 → 限流 → 变更 → 广播 整个序列
    /// 都在这把锁内完成，加入协议的快照顺序不变式由此保证：
    /// 任何影响房间成员关系的操作都无法插进序列中间。
    state: Mutex<DomainState>,
}

struct DomainState {
    sessions: HashMap<SessionId, ClientSession>,
}

impl Domain {
    pub fn new(
        id: String,
        tenant: String,
        auth_token: String,
        validator: Arc<MessageValidator>,
        flood_guard: Arc<FloodGuard>,
    ) -> Self {
        info!("🏠 新建域 [{}]，租户 [{}]", id, tenant);
        Self {
            id,
            tenant,
            auth_token,
            validator,
            flood_guard,
            state: Mutex::new(DomainState {
                sessions: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// 当前会话数
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// 获取会话信息快照
    pub async fn get_session_info(&self, id: &SessionId) -> Option<SessionInfo> {
        let st = self.state.lock().await;
        st.sessions.get(id).map(|session| SessionInfo {
            id: session.id.clone(),
            room: session.room.clone(),
            name: session.name.clone(),
            avatar: session.avatar.clone(),
            state: session.state,
            phase: session.phase,
            connected_at: session.connected_at,
        })
    }

    /// 连接进入本域：创建并注册会话
    ///
    /// 对合法连接不存在失败路径；未配置命名空间的连接在网关层就被拒了。
    pub async fn on_connect(
        &self,
        id: SessionId,
        remote_addr: Option<SocketAddr>,
        sink: Arc<dyn EventSink>,
    ) {
        let mut st = self.state.lock().await;
        debug!(
            "🔗 [{}] connection from [{}] (domain={})",
            id,
            remote_addr
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            self.id
        );
        st.sessions
            .insert(id.clone(), ClientSession::new(id, remote_addr, sink));
        metrics::record_domain_sessions(&self.id, st.sessions.len());
    }

    /// 连接断开：若在房间里先广播 leave，然后移除会话
    ///
    /// 重复断开（传输层重复通知）是 no-op，leave 只会广播一次。
    pub async fn on_disconnect(&self, id: &SessionId) {
        let mut st = self.state.lock().await;
        let Some(mut session) = st.sessions.remove(id) else {
            debug!("[{}] duplicate disconnect ignored (domain={})", id, self.id);
            return;
        };
        session.phase = SessionPhase::Terminated;

        debug!(
            "🔌 [{}] disconnected from [{}:{}]",
            id,
            self.id,
            session.room.as_deref().unwrap_or("none")
        );

        if let Some(room) = &session.room {
            let payload = serde_json::to_value(MemberLeave { id: session.id.clone() })
                .unwrap_or_default();
            Self::deliver(&st, id, room, Audience::RoomExceptSelf, EVENT_LEAVE, &payload);
        }

        metrics::record_domain_sessions(&self.id, st.sessions.len());
        // 会话随作用域销毁，房间成员关系和洪水计数一并丢弃
    }

    /// 处理一条入站事件
    ///
    /// 校验 → 限流 → 变更 → 广播，整体在域锁内跑完，期间不挂起。
    /// 任何一道门失败都会中止处理、保持会话状态不变，并只通知发起方。
    pub async fn handle_event(&self, id: &SessionId, kind: &str, payload: Value) {
        let mut st = self.state.lock().await;
        if !st.sessions.contains_key(id) {
            warn!(
                "[{}] event [{}] for unknown session (domain={})",
                id, kind, self.id
            );
            return;
        }
        metrics::record_event(kind);

        // 1. 结构校验门
        let kind = match self.validator.validate(kind, &payload) {
            Ok(Some(kind)) => kind,
            Ok(None) => {
                // 校验已关闭且类型名不认识：没有对应处理器，静默丢弃
                debug!("[{}] unknown event [{}] dropped (domain={})", id, kind, self.id);
                return;
            }
            Err(err) => {
                debug!("🚫 [{}] rejected [{}]: {} (domain={})", id, kind, err, self.id);
                metrics::record_event_rejected("schema");
                if let Some(session) = st.sessions.get(id) {
                    session.emit_err(&err);
                }
                return;
            }
        };

        // 2. 洪水限流门（只管配置里出现的类型）
        if self.flood_guard.governs(kind) {
            let now = Instant::now();
            let Some(session) = st.sessions.get_mut(id) else {
                return;
            };
            if let FloodDecision::Block { message } =
                self.flood_guard
                    .check(&mut session.flood_counters, kind, now)
            {
                debug!("🚫 [{}] flooded [{}] (domain={})", id, kind, self.id);
                metrics::record_event_rejected("flood");
                session.emit_err(&RelayError::RateLimited {
                    kind: kind.to_string(),
                    message,
                });
                return;
            }
        }

        // 3. 分发。消息类型是封闭枚举，不存在动态注册的处理器。
        match kind {
            MessageKind::Auth => self.on_auth(&mut st, id, payload),
            MessageKind::Join => self.on_join(&mut st, id, payload),
            MessageKind::Name => self.on_name(&mut st, id, payload),
            MessageKind::Typing => self.on_typing(&st, id),
            MessageKind::Say => self.on_say(&st, id, payload),
            MessageKind::Move => self.on_move(&mut st, id, payload),
            MessageKind::Avatar => self.on_avatar(&mut st, id, payload),
        }
    }

    // ---------- 事件处理器 ----------

    /// auth：占位认证 + 初始身份/状态 + ack + 加入协议
    fn on_auth(&self, st: &mut DomainState, id: &SessionId, payload: Value) {
        let Some(req) = Self::decode::<AuthRequest>(st, id, MessageKind::Auth, payload) else {
            return;
        };

        let roomed = {
            let Some(session) = st.sessions.get_mut(id) else {
                return;
            };

            if req.token != self.auth_token {
                info!("🚫 [{}] invalid token for domain [{}]", id, self.id);
                metrics::record_event_rejected("auth");
                session.emit_err(&RelayError::Auth(format!(
                    "Token mismatch for domain [{}]",
                    self.id
                )));
                // 会话保持未认证，连接不关
                return;
            }

            // 每个字段都是可选项，缺省沿用当前值
            if let Some(room) = req.room {
                session.room = Some(room);
            }
            if let Some(name) = req.name {
                session.name = name;
            }
            if let Some(state) = req.state {
                session.state = state;
            }
            if let Some(avatar) = req.avatar {
                session.avatar = Some(avatar);
            }
            session.phase = SessionPhase::Authenticated;

            info!(
                "✅ [{}] authenticated for domain [{}:{}]",
                id,
                self.id,
                session.room.as_deref().unwrap_or("none")
            );

            // 先回 ack，加入协议随后执行
            let ack = AuthAck {
                id: session.id.clone(),
                room: session.room.clone(),
            };
            session.emit(EVENT_AUTH, serde_json::to_value(ack).unwrap_or_default());

            session.room.is_some()
        };

        if roomed {
            self.finish_join(st, id);
        }
    }

    /// join：先向旧房间告别，再进新房间
    fn on_join(&self, st: &mut DomainState, id: &SessionId, payload: Value) {
        let Some(req) = Self::decode::<JoinRequest>(st, id, MessageKind::Join, payload) else {
            return;
        };

        let old_room = {
            let Some(session) = st.sessions.get_mut(id) else {
                return;
            };
            session.room.replace(req.room)
        };

        if let Some(old_room) = old_room {
            let payload =
                serde_json::to_value(MemberLeave { id: id.clone() }).unwrap_or_default();
            Self::deliver(
                st,
                id,
                &old_room,
                Audience::RoomExceptSelf,
                EVENT_LEAVE,
                &payload,
            );
        }

        self.finish_join(st, id);
    }

    /// 加入协议
    ///
    /// 先把同房间既有住户的快照逐条发给新加入者（名字、头像、状态的
    /// 时点拷贝，不是订阅），全部发完后，再把加入者广播给包括其本人
    /// 在内的整个房间。两步在同一把域锁内，别的 join/leave/disconnect
    /// 插不进中间；加入者绝不会在快照结束前收到自己的 join 回声，
    /// 也绝不会收到其他房间会话的快照条目。
    fn finish_join(&self, st: &DomainState, id: &SessionId) {
        let (sink, room, self_entry) = {
            let Some(session) = st.sessions.get(id) else {
                return;
            };
            let Some(room) = session.room.clone() else {
                return;
            };
            (session.sink(), room, session.join_entry())
        };

        debug!("📥 [{}] joined room [{}:{}]", id, self.id, room);

        for other in st.sessions.values() {
            if other.id != *id && other.room.as_deref() == Some(room.as_str()) {
                sink.emit(
                    EVENT_JOIN,
                    serde_json::to_value(other.join_entry()).unwrap_or_default(),
                );
            }
        }

        let payload = serde_json::to_value(self_entry).unwrap_or_default();
        Self::deliver(
            st,
            id,
            &room,
            Audience::RoomIncludingSelf,
            EVENT_JOIN,
            &payload,
        );
    }

    /// name：改显示名，全房间（含本人）可见
    fn on_name(&self, st: &mut DomainState, id: &SessionId, payload: Value) {
        let Some(req) = Self::decode::<NameRequest>(st, id, MessageKind::Name, payload) else {
            return;
        };

        let room = {
            let Some(session) = st.sessions.get_mut(id) else {
                return;
            };
            session.name = req.name.clone();
            session.room.clone()
        };

        let Some(room) = room else {
            return;
        };
        let payload = serde_json::to_value(NameChange {
            id: id.clone(),
            name: req.name,
        })
        .unwrap_or_default();
        Self::deliver(
            st,
            id,
            &room,
            Audience::RoomIncludingSelf,
            EVENT_NAME,
            &payload,
        );
    }

    /// typing：纯提示，无状态变更，发起方自己看不到
    fn on_typing(&self, st: &DomainState, id: &SessionId) {
        let Some(session) = st.sessions.get(id) else {
            return;
        };
        let Some(room) = session.room.clone() else {
            return;
        };
        let payload = serde_json::to_value(TypingPing { id: id.clone() }).unwrap_or_default();
        Self::deliver(
            st,
            id,
            &room,
            Audience::RoomExceptSelf,
            EVENT_TYPING,
            &payload,
        );
    }

    /// say：聊天消息转发，不改会话状态
    fn on_say(&self, st: &DomainState, id: &SessionId, payload: Value) {
        // schema 之外的类型级检查：即使校验被全局关闭，message 也必须是字符串
        if !matches!(payload.get("message"), Some(Value::String(_))) {
            let got = payload.get("message").map(schema::type_name).unwrap_or("nothing");
            debug!(
                "🚫 [{}] invalid [say] packet to domain [{}]. Expected string.",
                id, self.id
            );
            metrics::record_event_rejected("malformed");
            if let Some(session) = st.sessions.get(id) {
                session.emit_err(&RelayError::MalformedPayload {
                    kind: MessageKind::Say.to_string(),
                    detail: format!("Expected string. Got [{}]", got),
                });
            }
            return;
        }

        let Some(req) = Self::decode::<SayRequest>(st, id, MessageKind::Say, payload) else {
            return;
        };

        let Some(session) = st.sessions.get(id) else {
            return;
        };
        let Some(room) = session.room.clone() else {
            return;
        };
        let payload = serde_json::to_value(ChatSay {
            id: id.clone(),
            message: req.message,
        })
        .unwrap_or_default();
        Self::deliver(st, id, &room, Audience::RoomExceptSelf, EVENT_SAY, &payload);
    }

    /// move：5 元状态整体覆盖，buffer 原样透传给房间
    fn on_move(&self, st: &mut DomainState, id: &SessionId, payload: Value) {
        let Some(req) = Self::decode::<MoveRequest>(st, id, MessageKind::Move, payload) else {
            return;
        };

        let room = {
            let Some(session) = st.sessions.get_mut(id) else {
                return;
            };
            // 整体赋值：不存在某次 name 更新夹在一半状态中间的可见时刻
            session.state = req.state;
            session.room.clone()
        };

        let Some(room) = room else {
            return;
        };
        let payload = serde_json::to_value(MoveUpdate {
            id: id.clone(),
            buffer: req.buffer,
            state: req.state,
        })
        .unwrap_or_default();
        Self::deliver(st, id, &room, Audience::RoomExceptSelf, EVENT_MOVE, &payload);
    }

    /// avatar：换头像，全房间（含本人）可见
    fn on_avatar(&self, st: &mut DomainState, id: &SessionId, payload: Value) {
        let Some(req) = Self::decode::<AvatarRequest>(st, id, MessageKind::Avatar, payload) else {
            return;
        };

        let room = {
            let Some(session) = st.sessions.get_mut(id) else {
                return;
            };
            session.avatar = Some(req.metadata.clone());
            session.room.clone()
        };

        let Some(room) = room else {
            return;
        };
        let payload = serde_json::to_value(AvatarChange {
            id: id.clone(),
            metadata: req.metadata,
        })
        .unwrap_or_default();
        Self::deliver(
            st,
            id,
            &room,
            Audience::RoomIncludingSelf,
            EVENT_AVATAR,
            &payload,
        );
    }

    // ---------- 投递 ----------

    /// 按受众投递事件
    fn deliver(
        st: &DomainState,
        origin: &SessionId,
        room: &str,
        audience: Audience,
        event: &str,
        payload: &Value,
    ) {
        match audience {
            Audience::SelfOnly => {
                if let Some(session) = st.sessions.get(origin) {
                    session.emit(event, payload.clone());
                }
            }
            Audience::RoomExceptSelf => {
                Self::fanout(st, room, Some(origin), event, payload);
            }
            Audience::RoomIncludingSelf => {
                Self::fanout(st, room, None, event, payload);
            }
        }
    }

    /// 房间扇出：内存内遍历，不等待任何传输层写入。返回投递数。
    fn fanout(
        st: &DomainState,
        room: &str,
        exclude: Option<&SessionId>,
        event: &str,
        payload: &Value,
    ) -> usize {
        let mut delivered = 0;
        for session in st.sessions.values() {
            if session.room.as_deref() != Some(room) {
                continue;
            }
            if exclude == Some(&session.id) {
                continue;
            }
            session.emit(event, payload.clone());
            delivered += 1;
        }
        metrics::record_broadcast(event, delivered);
        delivered
    }

    /// 反序列化入站载荷。校验门已经放行，这里失败只会出现在
    /// 校验被全局关闭的场景，按 MalformedPayload 回给发起方。
    fn decode<T: DeserializeOwned>(
        st: &DomainState,
        id: &SessionId,
        kind: MessageKind,
        payload: Value,
    ) -> Option<T> {
        match serde_json::from_value(payload) {
            Ok(req) => Some(req),
            Err(err) => {
                metrics::record_event_rejected("malformed");
                if let Some(session) = st.sessions.get(id) {
                    session.emit_err(&RelayError::MalformedPayload {
                        kind: kind.to_string(),
                        detail: err.to_string(),
                    });
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingSink;

    fn test_domain() -> Domain {
        let config = crate::config::ServerConfig::default();
        Domain::new(
            "test".to_string(),
            "universe.frojs.com".to_string(),
            "hi".to_string(),
            Arc::new(MessageValidator::new(true)),
            Arc::new(FloodGuard::from_config(&config.flooding)),
        )
    }

    #[tokio::test]
    async fn test_connect_registers_session() {
        let domain = test_domain();
        let sink = RecordingSink::new();

        domain.on_connect("s1".to_string(), None, sink).await;
        assert_eq!(domain.session_count().await, 1);

        let info = domain.get_session_info(&"s1".to_string()).await.unwrap();
        assert_eq!(info.name, "Guest");
        assert_eq!(info.room, None);
        assert_eq!(info.phase, SessionPhase::Unauthenticated);
        assert_eq!(info.state.as_array(), [0.0; 5]);
    }

    #[tokio::test]
    async fn test_double_disconnect_is_noop() {
        let domain = test_domain();
        let a = RecordingSink::new();
        let b = RecordingSink::new();

        domain.on_connect("a".to_string(), None, a).await;
        domain.on_connect("b".to_string(), None, b.clone()).await;
        domain
            .handle_event(
                &"a".to_string(),
                "auth",
                serde_json::json!({ "token": "hi", "room": "lobby" }),
            )
            .await;
        domain
            .handle_event(
                &"b".to_string(),
                "auth",
                serde_json::json!({ "token": "hi", "room": "lobby" }),
            )
            .await;
        b.clear();

        // 模拟传输层重复通知：leave 只广播一次，移除只发生一次
        domain.on_disconnect(&"a".to_string()).await;
        domain.on_disconnect(&"a".to_string()).await;

        assert_eq!(domain.session_count().await, 1);
        assert_eq!(b.frames_named(EVENT_LEAVE).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session_event_ignored() {
        let domain = test_domain();
        domain
            .handle_event(&"ghost".to_string(), "typing", Value::Null)
            .await;
        assert_eq!(domain.session_count().await, 0);
    }
}
