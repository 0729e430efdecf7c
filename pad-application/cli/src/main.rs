use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};

use pad_executor::ExecutorError;

mod commands;
mod report;

#[derive(Parser)]
#[command(name = "pad")]
#[command(about = "PAD - 声明式测试编排执行引擎", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行配置中的全部场景套件
    Run {
        /// 配置文件路径 (默认按搜索路径查找)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// 并发工作者数量 (覆盖配置)
        #[arg(short, long)]
        workers: Option<i64>,

        /// 单步超时秒数 (覆盖配置)
        #[arg(short, long)]
        timeout: Option<f64>,

        /// 报告输出目录 (覆盖配置)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 控制台输出格式 (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// 输出调试日志
        #[arg(long)]
        debug: bool,
    },

    /// 加载并解析全部场景套件，不执行任何动作
    Validate {
        /// 配置文件路径 (默认按搜索路径查找)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 列出已注册的能力及其操作
    Capabilities,
}

/// 根据命令行参数确定日志级别
pub(crate) fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// 初始化日志 (重复调用时忽略)
pub(crate) fn init_logging(level: Level) {
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

/// 错误对应的退出码: 配置与加载错误为 2，其他为 1
fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ExecutorError>() {
        Some(e) if e.is_load_time() => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = parse_level(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            config,
            workers,
            timeout,
            output,
            format,
            debug,
        } => {
            let args = commands::run::RunArgs {
                config,
                workers,
                timeout,
                output,
                format,
                debug,
            };
            commands::run::handle(args, level).await
        }
        Commands::Validate { config } => {
            init_logging(level);
            commands::validate::handle(config).await
        }
        Commands::Capabilities => {
            init_logging(level);
            commands::capabilities::handle().await
        }
    };

    match result {
        Ok(true) => {
            info!("PAD 运行结束: 全部通过");
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
