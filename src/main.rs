use clap::{Arg, ArgAction, Command};
use hypergrid::core::config::BotConfig;
use hypergrid::core::router::EndpointRouter;
use hypergrid::core::engine::TradingEngine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 在bots目录中查找第一个active的配置文件
fn find_first_active_config() -> Option<PathBuf> {
    let bots_dir = Path::new("bots");
    if !bots_dir.is_dir() {
        return None;
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(bots_dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    files.sort();

    for path in files {
        match BotConfig::from_file(path.to_str()?) {
            Ok(config) if config.active => {
                log::info!("📁 找到活动配置: {}", path.display());
                return Some(path);
            }
            Ok(_) => {}
            Err(e) => log::warn!("⚠️ 读取 {} 失败: {}", path.display(), e),
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenv::dotenv().ok();

    // 解析命令行参数
    let matches = Command::new("hypergrid")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Hyperliquid网格交易机器人")
        .arg(
            Arg::new("config")
                .value_name("FILE")
                .help("配置文件路径（未提供时在bots/目录自动发现）"),
        )
        .arg(
            Arg::new("validate")
                .long("validate")
                .action(ArgAction::SetTrue)
                .help("仅验证配置"),
        )
        .get_matches();

    // 确定配置文件
    let config_path = match matches.get_one::<String>("config") {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                eprintln!("❌ 配置文件不存在: {}", path.display());
                std::process::exit(1);
            }
            path
        }
        None => match find_first_active_config() {
            Some(path) => path,
            None => {
                eprintln!("❌ bots/目录中没有找到活动配置");
                eprintln!("💡 在bots/目录创建配置文件并设置 active: true");
                std::process::exit(1);
            }
        },
    };

    let config = BotConfig::from_file(config_path.to_str().unwrap_or_default())?;

    // 按配置设置日志级别
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_level.to_lowercase()),
    )
    .init();

    if matches.get_flag("validate") {
        // 仅验证配置
        match config.validate() {
            Ok(()) => {
                println!("✅ 配置有效");
                return Ok(());
            }
            Err(e) => {
                eprintln!("❌ 配置错误: {}", e);
                std::process::exit(1);
            }
        }
    }

    log::info!(
        "启动机器人: {} (策略: {}, 交易对: {})",
        config.name,
        config.strategy.kind,
        config.strategy.symbol
    );

    // 路由器按环境构建并注入引擎
    let router = Arc::new(EndpointRouter::from_env(config.exchange.testnet));
    let engine = TradingEngine::initialize(config, router).await?;

    // Ctrl-C触发优雅停止
    let shutdown_handle = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("收到Ctrl-C, 准备停止");
            shutdown_handle.request_stop();
        }
    });

    engine.run().await?;
    Ok(())
}
