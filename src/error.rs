use std::error::Error as StdError;
use std::fmt;

/// 中继服务器错误类型
///
/// 核心内的所有拒绝都是局部恢复的：事件被丢弃、仅通知发起方，
/// 连接永远不会被核心主动关闭。
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    /// 认证失败（token 不匹配，会话保持未认证状态）
    Auth(String),
    /// 未注册的消息类型
    UnknownMessageKind(String),
    /// 消息结构校验失败（收集所有违反的约束，而不是只报第一条）
    SchemaViolation {
        kind: String,
        violations: Vec<String>,
    },
    /// 超出 schema 的类型级检查失败（例如 say.message 不是字符串）
    MalformedPayload { kind: String, detail: String },
    /// 触发洪水限流（惩罚窗口已顺延）
    RateLimited { kind: String, message: String },
    /// 配置错误
    Configuration(String),
    /// 传输层错误
    Transport(String),
    /// 内部错误
    Internal(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            RelayError::UnknownMessageKind(kind) => {
                write!(f, "Unknown message kind: {}", kind)
            }
            RelayError::SchemaViolation { kind, violations } => {
                write!(f, "Schema violation for [{}]: {}", kind, violations.join("; "))
            }
            RelayError::MalformedPayload { kind, detail } => {
                write!(f, "Malformed [{}] payload: {}", kind, detail)
            }
            RelayError::RateLimited { kind, message } => {
                write!(f, "Rate limited [{}]: {}", kind, message)
            }
            RelayError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            RelayError::Transport(msg) => write!(f, "Transport error: {}", msg),
            RelayError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for RelayError {}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Internal(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RelayError>;
