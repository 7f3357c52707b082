//! 传输层接缝
//!
//! 核心对一条连接的全部需求就是 `EventSink` 这一个窄接口：
//! 向本连接投递事件、查询对端地址。房间扇出和房间加入不在这里 ——
//! 成员关系归 Domain 自己的注册表管，扇出就是对注册表的遍历。
//! 任何传输实现（WebSocket 网关、测试桩）都可以替换进来。

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// 一帧出站事件，网关按 `{"event": ..., "data": ...}` 编码后写给客户端
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    pub event: String,
    pub data: Value,
}

/// 面向单条连接的事件出口
///
/// `emit` 是尽力而为且不阻塞的：核心内没有任何操作等待传输层写入，
/// 写入背压是传输协作方的事，不是核心的事。
pub trait EventSink: Send + Sync {
    /// 向本连接投递一个事件
    fn emit(&self, event: &str, payload: Value);

    /// 对端地址（测试桩可以没有）
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// 生产实现：把事件写进无界通道，由网关的写出任务排空
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    remote_addr: SocketAddr,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<OutboundFrame>, remote_addr: SocketAddr) -> Self {
        Self { tx, remote_addr }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: Value) {
        // 接收端没了说明连接正在关闭，事件直接丢掉
        if self
            .tx
            .send(OutboundFrame {
                event: event.to_string(),
                data: payload,
            })
            .is_err()
        {
            debug!("📤 事件投递失败（连接已关闭）: event={}", event);
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote_addr)
    }
}

/// 测试桩：记录投递到本连接的每一帧，供断言使用
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<OutboundFrame>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 按投递顺序返回所有帧的 (event, data) 副本
    pub fn frames(&self) -> Vec<(String, Value)> {
        self.frames
            .lock()
            .iter()
            .map(|frame| (frame.event.clone(), frame.data.clone()))
            .collect()
    }

    /// 只取指定事件名的帧
    pub fn frames_named(&self, event: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|frame| frame.event == event)
            .map(|frame| frame.data.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &str, payload: Value) {
        self.frames.lock().push(OutboundFrame {
            event: event.to_string(),
            data: payload,
        });
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}
