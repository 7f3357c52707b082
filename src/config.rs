use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cli::Cli;

/// 服务器配置
///
/// 加载优先级：命令行 > 环境变量（ROOMCAST_ 前缀）> 配置文件 > 默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 网关监听地址
    pub host: String,
    /// 网关监听端口
    pub port: u16,
    /// 日志级别
    pub log_level: String,
    /// 租户域列表（启动时固定，运行期不增减）
    pub domains: Vec<DomainConfig>,
    /// 洪水限流配置，按消息类型可调
    pub flooding: FloodingConfig,
    /// 安全配置
    pub security: SecurityConfig,
    /// 日志配置（level 的优先级低于 CLI）
    pub logging: LoggingConfig,
}

/// 单个租户域条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// 命名空间键，同时是域的 id，全局唯一
    pub namespace: String,
    /// 租户标识，仅作展示用途
    pub tenant: String,
}

/// 洪水限流配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodingConfig {
    pub say: FloodRuleConfig,
    pub avatar: FloodRuleConfig,
    pub name: FloodRuleConfig,
}

/// 单类消息的限流参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloodRuleConfig {
    /// 计数器重置间隔（毫秒）
    pub reset_interval_ms: u64,
    /// 窗口内允许的最大消息数
    pub max_updates: u32,
    /// 触发限流时回给客户端的提示语
    pub error_message: String,
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// 是否用 JSON 结构约束校验入站消息
    pub validate_messages: bool,
    /// 认证口令（占位实现：纯相等比较，不接真实认证源）
    pub auth_token: String,
}

/// 日志配置段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            domains: vec![
                DomainConfig {
                    namespace: "sybolt".to_string(),
                    tenant: "sybolt.com".to_string(),
                },
                DomainConfig {
                    namespace: "test".to_string(),
                    tenant: "universe.frojs.com".to_string(),
                },
            ],
            flooding: FloodingConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for FloodingConfig {
    fn default() -> Self {
        Self {
            say: FloodRuleConfig {
                reset_interval_ms: 3000,
                max_updates: 5,
                error_message: "Stop that shit".to_string(),
            },
            avatar: FloodRuleConfig {
                reset_interval_ms: 5000,
                max_updates: 1,
                error_message: "Who are you, Arturo Brachetti?".to_string(),
            },
            name: FloodRuleConfig {
                reset_interval_ms: 5000,
                max_updates: 1,
                error_message: "Please calm your identity crisis".to_string(),
            },
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            validate_messages: true,
            auth_token: "hi".to_string(),
        }
    }
}

impl ServerConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 TOML 文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("无法读取配置文件: {:?}", path.as_ref()))?;

        let config: ServerConfig = toml::from_str(&content).with_context(|| "配置文件格式错误")?;

        config.validate()?;
        Ok(config)
    }

    /// 按优先级加载：命令行 > 环境变量 > 配置文件 > 默认值
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match resolve_config_path(cli.config_file.as_deref()) {
            Some(path) => Self::from_toml_file(&path)?,
            None => Self::default(),
        };

        config.merge_from_env();
        config.merge_from_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量合并配置（ROOMCAST_ 前缀）
    pub fn merge_from_env(&mut self) {
        if let Ok(host) = env::var("ROOMCAST_HOST") {
            self.host = host;
        }
        if let Ok(port) = env::var("ROOMCAST_PORT") {
            self.port = port.parse().unwrap_or(self.port);
        }
        if let Ok(log_level) = env::var("ROOMCAST_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(token) = env::var("ROOMCAST_AUTH_TOKEN") {
            self.security.auth_token = token;
        }
        if let Ok(validate) = env::var("ROOMCAST_VALIDATE_MESSAGES") {
            self.security.validate_messages = validate.parse().unwrap_or(self.security.validate_messages);
        }
    }

    /// 从命令行参数合并配置
    pub fn merge_from_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(level) = cli.get_log_level() {
            self.log_level = level;
        }
    }

    /// 配置一致性检查
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for domain in &self.domains {
            if domain.namespace.is_empty() {
                anyhow::bail!("域的 namespace 不能为空");
            }
            if !seen.insert(domain.namespace.as_str()) {
                anyhow::bail!("重复的域 namespace: {}", domain.namespace);
            }
        }

        if self.domains.is_empty() {
            warn!("⚠️ 未配置任何租户域，所有连接都会被网关拒绝");
        }

        Ok(())
    }

    /// 网关监听地址
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 解析配置文件路径：显式指定的必须存在；未指定时尝试 ./config.toml
fn resolve_config_path(explicit: Option<&str>) -> Option<String> {
    match explicit {
        Some(path) => Some(path.to_string()),
        None => {
            let default = "config.toml";
            Path::new(default).exists().then(|| default.to_string())
        }
    }
}

/// 快速读取配置文件的 [logging] 段（不加载完整配置）
///
/// 在完整配置加载之前初始化日志用。文件不存在或解析失败都静默回退默认值。
pub fn load_early_logging_config(path: Option<&str>) -> LoggingConfig {
    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Early {
        logging: LoggingConfig,
    }

    let path = match resolve_config_path(path) {
        Some(path) => path,
        None => return LoggingConfig::default(),
    };

    fs::read_to_string(&path)
        .ok()
        .and_then(|content| toml::from_str::<Early>(&content).ok())
        .map(|early| early.logging)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.domains.len(), 2);
        assert!(config.security.validate_messages);
        assert_eq!(config.security.auth_token, "hi");
        assert_eq!(config.flooding.say.max_updates, 5);
        assert_eq!(config.flooding.avatar.reset_interval_ms, 5000);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_str = r#"
            port = 9000

            [[domains]]
            namespace = "acme"
            tenant = "acme.example.com"

            [flooding.say]
            reset_interval_ms = 1000
            max_updates = 2
            error_message = "slow down"
        "#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.domains.len(), 1);
        assert_eq!(config.domains[0].namespace, "acme");
        // 未给出的段落落回默认值
        assert_eq!(config.flooding.say.max_updates, 2);
        assert_eq!(config.flooding.name.max_updates, 1);
        assert_eq!(config.security.auth_token, "hi");
    }

    #[test]
    fn test_duplicate_namespace_rejected() {
        let mut config = ServerConfig::default();
        config.domains.push(DomainConfig {
            namespace: "sybolt".to_string(),
            tenant: "elsewhere".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_logging_section() {
        let toml_str = r#"
            [logging]
            level = "debug"
            format = "json"
        "#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        assert_eq!(config.logging.file, None);
    }
}
