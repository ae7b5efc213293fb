//! callrelay 主程序
//!
//! 加载配置，按 `enable` 位掩码启动信令网关和审计日志服务

mod cli;
mod observability;

use callrelay::error::{Error, Result};
use callrelay::service::{ServiceInfo, ServiceManager, ServiceType};
use callrelay_common::config::CallRelayConfig;
use clap::Parser;
use observability::init_observability;
use std::path::{Path, PathBuf};
use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};

struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    /// 查找配置文件：显式路径必须存在，默认路径依次尝试当前目录和 /etc/callrelay
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            }
            bootstrap_error!("Provided config file not found: {:?}", provided_path);
            return Err(Error::custom(format!(
                "Config file not found: {provided_path:?}"
            )));
        }

        let fallback_paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/callrelay/config.toml"),
        ];

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            }
            bootstrap_info!("Config not found at: {:?}", path);
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: callrelay --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// 解析并校验配置文件，不启动任何服务
    fn test_config_file(config_path: &Path) -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();

        let config = CallRelayConfig::from_file(config_path).map_err(|e| {
            error!("❌ 配置文件解析失败: {}", e);
            Error::service_validation(format!("配置解析失败: {e}"))
        })?;
        info!("✅ 配置文件解析成功: {:?}", config_path);

        if let Err(errors) = config.validate() {
            let has_errors = report_validation(&errors);
            if has_errors {
                error!("❌ 配置验证失败");
                return Err(Error::service_validation("配置验证失败"));
            }
        }

        info!("✅ 配置验证通过");
        Ok(())
    }

    async fn run_application(config_path: &Path) -> Result<()> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = match CallRelayConfig::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                bootstrap_error!("❌ 配置加载失败: {}", e);
                return Err(e.into());
            }
        };

        if let Err(errors) = config.validate() {
            let mut has_critical_errors = false;
            for (i, err) in errors.iter().enumerate() {
                if err.starts_with("Warning:") {
                    bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                } else {
                    bootstrap_error!("  {}. ❌ {}", i + 1, err);
                    has_critical_errors = true;
                }
            }
            if has_critical_errors {
                return Err(Error::service_validation("配置验证失败，请修复上述错误"));
            }
        }

        let _observability_guard = init_observability(&config)?;

        Self::run_services(config).await
    }

    async fn run_services(config: CallRelayConfig) -> Result<()> {
        info!("🚀 启动 callrelay ({}, env={})", config.name, config.env);

        if let Err(e) = callrelay_common::metrics::register_metrics() {
            error!("Prometheus metrics registration failed: {}", e);
        }

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(10);
        setup_ctrl_c_handler(shutdown_tx.clone());

        let mut service_manager = ServiceManager::new(config.clone(), shutdown_tx.clone());
        let handles = match service_manager.start_all().await {
            Ok(handles) => handles,
            Err(e) => {
                error!("Service startup failed: {}", e);
                service_manager.stop_all();
                return Err(e);
            }
        };

        Self::display_service_info(&config, service_manager.running());

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Service task terminated unexpectedly: {}", e);
                let _ = shutdown_tx.send(());
            }
        }

        info!("🛑 所有服务已安全关闭");
        Ok(())
    }

    fn display_service_info(config: &CallRelayConfig, running: &[ServiceInfo]) {
        if running.is_empty() {
            info!("📡 没有启用任何服务 (enable = {})", config.enable);
            return;
        }

        info!("✅ 所有服务已启动");
        for service in running {
            info!("  - {}: {}", service.name, service.url());
            if service.service_type == ServiceType::Gateway {
                info!(
                    "    ws://{}{}, /health, /metrics",
                    service.addr, config.signaling.ws_path
                );
            }
        }
    }
}

/// 打印校验结果，返回是否存在阻止启动的错误
fn report_validation(errors: &[String]) -> bool {
    let mut has_errors = false;
    for (i, err) in errors.iter().enumerate() {
        if err.starts_with("Warning:") {
            info!("  {}. ⚠️  {}", i + 1, err);
        } else {
            error!("  {}. ❌ {}", i + 1, err);
            has_errors = true;
        }
    }
    has_errors
}

fn setup_ctrl_c_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        let _ = shutdown_tx.send(());
    });
}
