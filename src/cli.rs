use clap::{Parser, Subcommand};

// 确保 Parser trait 被使用
impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Roomcast Server - 多租户实时在线状态中继服务器
#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(version)]
#[command(about = "多租户实时在线状态中继服务器", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 服务器监听地址
    #[arg(long, value_name = "ADDRESS", help = "服务器监听地址")]
    pub host: Option<String>,

    /// 监听端口
    #[arg(long, value_name = "PORT", help = "网关监听端口")]
    pub port: Option<u16>,

    /// 日志级别
    #[arg(
        long,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', help = "静默模式（不输出日志）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
}

impl Cli {
    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        // 根据 verbose 级别设置
        match self.verbose {
            0 => None, // 使用默认或配置文件
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
