use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志系统
///
/// 返回的 guard 必须在 main 里持有到进程结束，否则文件日志的
/// 后台写线程会提前退出。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    // 如果静默模式，只输出错误
    let level = if quiet { "error" } else { log_level };

    // 解析日志级别
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 可选的文件输出（非阻塞写入）
    let (file_layer, guard) = match log_file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => std::path::Path::new("."),
            };
            let file_name = path.file_name().context("日志文件路径缺少文件名")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    // 根据格式选择不同的输出方式
    match log_format {
        Some("json") => {
            // JSON 格式（适合生产环境）
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().json())
                .init();
        }
        Some("pretty") | Some("dev") => {
            // Pretty 格式（适合开发环境）
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().pretty())
                .init();
        }
        _ => {
            // Compact 格式（默认）
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(fmt::layer().compact())
                .init();
        }
    }

    Ok(guard)
}
