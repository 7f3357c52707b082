//! Prometheus 指标：连接数、各域会话数、入站事件量与广播量
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const GAUGE_CONNECTIONS: &str = "roomcast_connections_current";
const GAUGE_DOMAIN_SESSIONS: &str = "roomcast_domain_sessions_current";
const COUNTER_EVENTS: &str = "roomcast_events_total";
const COUNTER_EVENTS_REJECTED: &str = "roomcast_events_rejected_total";
const COUNTER_BROADCASTS: &str = "roomcast_broadcasts_total";

/// 初始化 Prometheus 指标（安装全局 Recorder，返回 Handle 用于 HTTP 暴露）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 是否已初始化（可供 /metrics 使用）
pub fn is_initialized() -> bool {
    HANDLE.get().is_some()
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 更新当前网关连接数（Gauge）。在连接建立/断开后调用。
pub fn record_connection_count(count: u64) {
    metrics::gauge!(GAUGE_CONNECTIONS).set(count as f64);
}

/// 更新某个域的会话数（Gauge）。
pub fn record_domain_sessions(domain: &str, count: usize) {
    metrics::gauge!(GAUGE_DOMAIN_SESSIONS, "domain" => domain.to_string()).set(count as f64);
}

/// 记录一条入站事件。
pub fn record_event(kind: &str) {
    metrics::counter!(COUNTER_EVENTS, "kind" => kind.to_string()).increment(1);
}

/// 记录一条被拒绝的入站事件（schema / 限流 / 认证）。
pub fn record_event_rejected(reason: &'static str) {
    metrics::counter!(COUNTER_EVENTS_REJECTED, "reason" => reason).increment(1);
}

/// 记录一次房间扇出投递的事件数。
pub fn record_broadcast(event: &str, delivered: usize) {
    metrics::counter!(COUNTER_BROADCASTS, "event" => event.to_string())
        .increment(delivered as u64);
}
