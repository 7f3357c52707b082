//! 网关与进程装配
//!
//! 传输协作方的具体实现：axum WebSocket 端点按命名空间把连接路由到
//! 对应的域，线上格式是 `{"event": ..., "data": ...}` 的 JSON 文本帧。
//! 每条连接一个写出任务排空出站通道；读入循环一帧一事件地喂给域，
//! 处理完一条才取下一条。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::domain::{Domain, DomainRegistry};
use crate::error::{RelayError, Result};
use crate::metrics;
use crate::model::SessionId;
use crate::transport::{ChannelSink, OutboundFrame};

/// 一帧入站事件
#[derive(Debug, Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// 网关侧的连接信息（供健康检查展示）
#[derive(Debug, Clone)]
struct ConnectionInfo {
    namespace: String,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
}

/// 路由共享状态
#[derive(Clone)]
struct AppState {
    registry: Arc<DomainRegistry>,
    connections: Arc<DashMap<SessionId, ConnectionInfo>>,
    started_at: DateTime<Utc>,
}

/// 中继服务器
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<DomainRegistry>,
}

impl RelayServer {
    /// 创建中继服务器：建好域注册表，装好指标 Recorder
    pub fn new(config: ServerConfig) -> Result<Self> {
        info!("🔧 初始化中继服务器组件...");

        let registry = Arc::new(DomainRegistry::from_config(&config)?);
        info!("✅ 域注册表初始化完成（{} 个域）", registry.len());

        // Recorder 全进程只装一次；重复构造服务器（测试）时直接复用
        if metrics::init().is_err() {
            debug!("指标 Recorder 已存在，跳过安装");
        }

        Ok(Self { config, registry })
    }

    pub fn registry(&self) -> Arc<DomainRegistry> {
        self.registry.clone()
    }

    /// 运行网关，直到进程退出
    pub async fn run(self) -> Result<()> {
        let state = AppState {
            registry: self.registry.clone(),
            connections: Arc::new(DashMap::new()),
            started_at: Utc::now(),
        };

        let app = Router::new()
            .route("/", get(root_handler))
            .route("/healthz", get(healthz_handler))
            .route("/metrics", get(metrics_handler))
            .route("/{namespace}", get(ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(state);

        let addr = self.config.bind_address();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::Transport(format!("绑定 {} 失败: {}", addr, e)))?;

        info!("🚀 Roomcast 网关监听 {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))?;

        Ok(())
    }
}

async fn root_handler() -> &'static str {
    "Hello!"
}

/// 健康检查：运行时长、连接数、各域会话数
async fn healthz_handler(State(state): State<AppState>) -> Json<Value> {
    let mut domains = serde_json::Map::new();
    for namespace in state.registry.namespaces() {
        if let Some(domain) = state.registry.get(&namespace) {
            domains.insert(
                namespace,
                serde_json::json!({
                    "tenant": domain.tenant(),
                    "sessions": domain.session_count().await,
                }),
            );
        }
    }

    Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "connections": state.connections.len(),
        "domains": domains,
    }))
}

/// Prometheus 抓取端点
async fn metrics_handler() -> Response {
    match metrics::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not initialized",
        )
            .into_response(),
    }
}

/// WebSocket 升级入口
///
/// 未配置的命名空间在这里拒绝，核心永远看不到这类连接。
async fn ws_handler(
    Path(namespace): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(domain) = state.registry.get(&namespace) else {
        warn!(
            "🚫 拒绝到未配置命名空间 [{}] 的连接（from {}）",
            namespace, remote_addr
        );
        return (StatusCode::NOT_FOUND, "unknown namespace").into_response();
    };

    ws.on_upgrade(move |socket| handle_connection(socket, domain, state, namespace, remote_addr))
}

async fn handle_connection(
    socket: WebSocket,
    domain: Arc<Domain>,
    state: AppState,
    namespace: String,
    remote_addr: SocketAddr,
) {
    // 会话 id 由传输层分配，进程生命周期内唯一
    let session_id: SessionId = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let sink = Arc::new(ChannelSink::new(tx, remote_addr));

    domain
        .on_connect(session_id.clone(), Some(remote_addr), sink)
        .await;
    state.connections.insert(
        session_id.clone(),
        ConnectionInfo {
            namespace: namespace.clone(),
            remote_addr,
            connected_at: Utc::now(),
        },
    );
    metrics::record_connection_count(state.connections.len() as u64);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // 写出任务：排空会话的出站通道
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                // 连接已断，剩余事件丢弃
                break;
            }
        }
    });

    // 读入循环：一帧一事件，处理完一条才取下一条
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => {
                    domain
                        .handle_event(&session_id, &frame.event, frame.data)
                        .await
                }
                Err(err) => {
                    debug!("[{}] 丢弃无法解析的帧: {}", session_id, err);
                }
            },
            Ok(Message::Close(_)) | Err(_) => break,
            // ping/pong 由底层回应，binary 帧不在协议里
            Ok(_) => {}
        }
    }

    // 断开收尾是立即且非阻塞的：leave 广播尽力而为，不等确认
    domain.on_disconnect(&session_id).await;
    if let Some((_, info)) = state.connections.remove(&session_id) {
        debug!(
            "🔌 [{}] gateway connection closed (namespace={}, peer={}, lived_since={})",
            session_id, info.namespace, info.remote_addr, info.connected_at
        );
    }
    metrics::record_connection_count(state.connections.len() as u64);
    writer.abort();
}
