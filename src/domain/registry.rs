use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::config::ServerConfig;
use crate::domain::Domain;
use crate::error::{RelayError, Result};
use crate::schema::MessageValidator;
use crate::security::FloodGuard;

/// 域注册表
///
/// 启动时按租户配置建好全部域，之后只读：没有运行期增减域的 API。
/// 每个入站连接按命名空间路由到它所属的域；没配置的命名空间在
/// 网关层就被拒绝，到不了这里。
pub struct DomainRegistry {
    domains: HashMap<String, Arc<Domain>>,
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

impl DomainRegistry {
    /// 从配置构造。校验器和限流器是进程级单例，所有域共享。
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let validator = Arc::new(MessageValidator::new(config.security.validate_messages));
        let flood_guard = Arc::new(FloodGuard::from_config(&config.flooding));

        let mut domains = HashMap::new();
        for entry in &config.domains {
            if domains.contains_key(&entry.namespace) {
                return Err(RelayError::Configuration(format!(
                    "重复的域 namespace: {}",
                    entry.namespace
                )));
            }
            domains.insert(
                entry.namespace.clone(),
                Arc::new(Domain::new(
                    entry.namespace.clone(),
                    entry.tenant.clone(),
                    config.security.auth_token.clone(),
                    validator.clone(),
                    flood_guard.clone(),
                )),
            );
        }

        if domains.is_empty() {
            warn!("⚠️ 域注册表为空，所有连接都会被拒绝");
        }

        Ok(Self { domains })
    }

    /// 按命名空间取域
    pub fn get(&self, namespace: &str) -> Option<Arc<Domain>> {
        self.domains.get(namespace).cloned()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// 全部命名空间（排序后，供健康检查输出）
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.domains.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;

    #[test]
    fn test_builds_one_domain_per_entry() {
        let config = ServerConfig::default();
        let registry = DomainRegistry::from_config(&config).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("sybolt").is_some());
        assert!(registry.get("test").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.namespaces(), vec!["sybolt", "test"]);
    }

    #[test]
    fn test_duplicate_namespace_is_configuration_error() {
        let mut config = ServerConfig::default();
        config.domains.push(DomainConfig {
            namespace: "sybolt".to_string(),
            tenant: "elsewhere".to_string(),
        });

        let err = DomainRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }
}
