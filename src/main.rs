use anyhow::{Context, Result};
use roomcast::{
    cli::Cli,
    config::{self, ServerConfig},
    logging, RelayServer,
};
use std::fs;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            roomcast::cli::Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            roomcast::cli::Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            roomcast::cli::Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 快速读取 config.toml 的 [logging] 段（不加载完整配置）
    let early_log = config::load_early_logging_config(cli.config_file.as_deref());

    // 合并日志配置（优先级：CLI > config.toml > 默认值）
    let log_level = cli
        .get_log_level()
        .or(early_log.level)
        .unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format().or(early_log.format);
    let log_file = cli.log_file.as_deref().or(early_log.file.as_deref());

    // guard 持有到进程结束，文件日志的后台写线程才不会提前退出
    let _log_guard = logging::init_logging(&log_level, log_format.as_deref(), log_file, cli.quiet)?;

    tracing::info!("🚀 Roomcast Server starting...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Listen: {}", config.bind_address());
    tracing::info!("  - Domains: {}", config.domains.len());
    for domain in &config.domains {
        tracing::info!("    - [{}] tenant={}", domain.namespace, domain.tenant);
    }
    tracing::info!("  - Validate Messages: {}", config.security.validate_messages);
    tracing::info!(
        "  - Flooding: say={}ms/{} avatar={}ms/{} name={}ms/{}",
        config.flooding.say.reset_interval_ms,
        config.flooding.say.max_updates,
        config.flooding.avatar.reset_interval_ms,
        config.flooding.avatar.max_updates,
        config.flooding.name.reset_interval_ms,
        config.flooding.name.max_updates,
    );
    tracing::info!("  - Log Level: {}", config.log_level);
    tracing::info!(
        "  - Log Format: {:?}",
        log_format.as_deref().unwrap_or("compact")
    );
    if let Some(f) = log_file {
        tracing::info!("  - Log File: {}", f);
    }

    // 创建服务器（配置不一致会打印错误并退出）
    let server = match RelayServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("❌ 服务器初始化失败: {}", e);
            tracing::error!("💡 请检查配置后重试");
            process::exit(1);
        }
    };

    // 运行服务器
    if let Err(e) = server.run().await {
        tracing::error!("❌ 服务器运行失败: {}", e);
        tracing::error!("💡 服务器将退出");
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# Roomcast Server 配置文件
# 此文件由 roomcast generate-config 生成

host = "0.0.0.0"
port = 3000

# 注册到本服务器的租户域
[[domains]]
namespace = "sybolt"
tenant = "sybolt.com"

[[domains]]
namespace = "test"
tenant = "universe.frojs.com"

# 洪水限流，按消息类型可调
[flooding.say]
reset_interval_ms = 3000
max_updates = 5
error_message = "Stop that shit"

[flooding.avatar]
reset_interval_ms = 5000
max_updates = 1
error_message = "Who are you, Arturo Brachetti?"

[flooding.name]
reset_interval_ms = 5000
max_updates = 1
error_message = "Please calm your identity crisis"

[security]
validate_messages = true
auth_token = "hi"

[logging]
level = "info"
format = "compact"
# file = "./logs/server.log"
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Listen: {}", config.bind_address());
    println!("  - Domains: {}", config.domains.len());
    println!("  - Validate Messages: {}", config.security.validate_messages);

    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    // 初始化基本日志（用于显示配置）
    let _log_guard = logging::init_logging("info", None, None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
