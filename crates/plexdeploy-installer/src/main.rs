//! PlexDevelopment 产品安装器命令行入口（`plexdeploy`）。
//!
//! 职责：
//! - 解析命令行参数，加载安装器配置
//! - 获取主机级互斥锁（所有子命令均在持锁状态下执行，直到进程退出），安装 SIGINT 处理（协作式取消）
//! - 分发到安装事务、卸载、插件管理、服务运维、证书管理、自检与环境诊断
//!
//! 退出码：
//! - 0：成功（含“健康但有警告”）
//! - 1：失败并已回滚 / 取消并已回滚 / 其它错误
//! - 2：安装完成但自检不健康
//! - 3：未开始安装即中止（未找到归档、实例名冲突等）
//!
//! 权限要求：
//! - 安装、卸载、插件安装/删除、服务启停、证书管理需要 root（写 /var/www、/etc/nginx、systemd 单元、防火墙）
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use plexdeploy_core::config::InstallerConfig;
use plexdeploy_core::paths::{self, Layout};
use plexdeploy_core::report::{CheckStatus, SelfTestReport};
use plexdeploy_installer::addons::{AddonManager, ConfigCheck};
use plexdeploy_installer::host::{HealthProbe, Provisioner, RenewMode, ServiceAction, SystemHost};
use plexdeploy_installer::manage::{self, ServiceCommand};
use plexdeploy_installer::transaction::{InstallRequest, Transaction, TransactionOutcome, WebRequest};
use plexdeploy_linux::lock::HostLock;
use plexdeploy_linux::{elevation, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// 命令行参数。
///
/// 说明：
/// - `config` 指向安装器配置（JSON），未指定时使用内置默认值
/// - `json` 以 JSON 输出结果，便于脚本处理；日志始终写到 stderr
#[derive(Debug, Parser)]
#[command(name = "plexdeploy", version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// 支持的子命令。
#[derive(Debug, Subcommand)]
enum Commands {
    /// 安装产品（失败或中断时自动回滚）。
    Install(InstallArgs),
    /// 按实例状态记录卸载实例。
    Uninstall {
        instance: String,
    },
    /// 对已安装实例重新执行自检。
    Selftest {
        instance: String,
    },
    /// 列出已安装实例。
    List,
    /// 环境诊断（root、Node.js、外部工具）。
    Doctor,
    /// 插件管理。
    #[command(subcommand)]
    Addon(AddonCommands),
    /// 实例服务运维。
    #[command(subcommand)]
    Service(ServiceCommands),
    /// TLS 证书管理。
    #[command(subcommand)]
    Ssl(SslCommands),
}

#[derive(Debug, Args)]
struct InstallArgs {
    /// 产品名（如 plextickets）。
    product: String,

    /// 归档路径（zip/rar）；不指定时在搜索目录中查找。
    #[arg(long)]
    archive: Option<String>,

    /// 实例名；不指定时自动生成。
    #[arg(long)]
    instance: Option<String>,

    /// 监听端口；不指定时使用产品默认端口。
    #[arg(long)]
    port: Option<u16>,

    /// 域名；指定后配置 nginx 反向代理并申请证书。
    #[arg(long, requires = "email")]
    domain: Option<String>,

    /// 证书申请邮箱。
    #[arg(long, requires = "domain")]
    email: Option<String>,

    /// 开通本机 MongoDB 用户。
    #[arg(long, default_value_t = false)]
    database: bool,

    /// 不注册 systemd 服务。
    #[arg(long, default_value_t = false)]
    no_service: bool,

    /// Dashboard 插件归档（仅对提供该选项的产品有效）。
    #[arg(long)]
    dashboard_archive: Option<String>,
}

#[derive(Debug, Subcommand)]
enum AddonCommands {
    /// 从归档安装插件。
    Install { instance: String, archive: String },
    /// 列出实例的插件。
    List { instance: String },
    /// 删除插件。
    Remove { instance: String, name: String },
    /// 校验插件 YAML 配置。
    CheckConfig { instance: String, name: String },
}

#[derive(Debug, Subcommand)]
enum ServiceCommands {
    /// 启动服务。
    Start { instance: String },
    /// 停止服务。
    Stop { instance: String },
    /// 重启服务（插件变更后需要）。
    Restart { instance: String },
    /// 查看服务状态。
    Status { instance: String },
    /// 查看最近的服务日志。
    Logs {
        instance: String,
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
}

#[derive(Debug, Subcommand)]
enum SslCommands {
    /// 查看已签发证书。
    Status,
    /// 续期证书。
    Renew {
        /// 只演练，不写入证书。
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// 立即续期全部证书（不论是否临近到期）。
        #[arg(long, default_value_t = false, conflicts_with = "dry_run")]
        force: bool,
    },
}

/// 程序入口：初始化日志、解析参数并分发子命令。
///
/// 异常处理：
/// - 子命令返回的错误统一记录日志并以退出码 1 结束
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<u8> {
    let config = InstallerConfig::load_or_default(cli.config.as_deref())?;
    let _lock = HostLock::acquire(&config.lock_file)?;
    match &cli.command {
        Commands::Install(args) => install(cli, &config, args),
        Commands::Uninstall { instance } => uninstall(cli, &config, instance),
        Commands::Selftest { instance } => selftest(cli, &config, instance),
        Commands::List => list(cli, &config),
        Commands::Addon(cmd) => addon(cli, &config, cmd),
        Commands::Service(cmd) => service(&config, cmd),
        Commands::Ssl(cmd) => ssl(&config, cmd),
        Commands::Doctor => doctor(cli, &config),
    }
}

fn allow_non_root_for_tests() -> bool {
    matches!(
        std::env::var("PLEXDEPLOY_TEST_ALLOW_NON_ROOT").as_deref(),
        Ok("1")
    )
}

fn require_root(action: &str) -> Result<()> {
    if allow_non_root_for_tests() || elevation::is_root() {
        return Ok(());
    }
    Err(anyhow!("{action}需要 root 权限，请使用 sudo 运行"))
}

fn resolve_arg(raw: &str) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("获取当前目录失败")?;
    paths::resolve_path(&cwd, raw)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("序列化输出失败")?);
    Ok(())
}

/// 执行安装事务。
///
/// 主要步骤：
/// 1) 权限检查（root）
/// 2) 安装 SIGINT 处理并清除中断标志
/// 3) 组装安装请求，运行事务
/// 4) 输出结论、警告与后续事项
///
/// 返回值：
/// - 由事务结论决定的退出码
fn install(cli: &Cli, config: &InstallerConfig, args: &InstallArgs) -> Result<u8> {
    require_root("安装")?;
    if let Err(e) = signal::install_interrupt_handler() {
        warn!("安装中断处理失败，Ctrl+C 将直接终止进程: {}", e);
    }
    signal::reset();

    let mut request = InstallRequest::new(&args.product);
    request.archive = args.archive.as_deref().map(resolve_arg).transpose()?;
    request.instance = args.instance.clone();
    request.port = args.port;
    request.web = args
        .domain
        .clone()
        .zip(args.email.clone())
        .map(|(domain, email)| WebRequest { domain, email });
    request.setup_database = args.database;
    request.register_service = !args.no_service;
    request.dashboard_archive = args.dashboard_archive.as_deref().map(resolve_arg).transpose()?;

    let host = SystemHost::new(config);
    let cancel = signal::interrupted;
    let outcome = Transaction::new(config, &host, &host, &cancel).run(&request);

    if cli.json {
        print_json(&outcome)?;
    } else {
        print_outcome(&outcome);
    }
    let code = outcome.verdict().exit_code();
    Ok(u8::try_from(code).unwrap_or(1))
}

fn print_outcome(outcome: &TransactionOutcome) {
    println!("结论: {:?}", outcome.verdict());
    if let Some(instance) = &outcome.instance {
        println!("实例: {instance}");
    }
    if let Some(path) = &outcome.install_path {
        println!("安装目录: {}", path.display());
    }
    if let (Some(step), Some(err)) = (outcome.failed_step, &outcome.error) {
        println!("失败步骤: {step}");
        println!("原因: {err}");
    } else if let Some(err) = &outcome.error {
        println!("原因: {err}");
    }
    if let Some(report) = &outcome.rollback {
        for action in &report.actions {
            let mark = if action.ok { "ok" } else { "FAILED" };
            println!("回滚 {:?}: {} {}", action.step, mark, action.detail);
        }
    }
    if let Some(report) = &outcome.self_test {
        print_report(report);
    }
    for w in &outcome.warnings {
        println!("警告: {w}");
    }
    for r in &outcome.reminders {
        println!("后续: {r}");
    }
}

fn print_report(report: &SelfTestReport) {
    for r in &report.results {
        println!("[{}] {}: {}", r.status, r.name, r.detail);
        if r.status != CheckStatus::Pass {
            if let Some(hint) = &r.hint {
                println!("       建议: {hint}");
            }
        }
    }
    println!(
        "合计: pass={} warn={} fail={}",
        report.count(CheckStatus::Pass),
        report.count(CheckStatus::Warn),
        report.count(CheckStatus::Fail)
    );
}

fn uninstall(cli: &Cli, config: &InstallerConfig, instance: &str) -> Result<u8> {
    require_root("卸载")?;
    let host = SystemHost::new(config);
    let outcome = manage::uninstall(&Layout::new(config), instance, &host)?;
    if cli.json {
        print_json(&outcome)?;
    } else {
        for action in &outcome.rollback.actions {
            let mark = if action.ok { "ok" } else { "FAILED" };
            println!("{:?}: {} {}", action.step, mark, action.detail);
        }
        if outcome.state_removed {
            println!("实例 {} 已卸载", outcome.instance);
        } else {
            println!("实例 {} 部分清理失败，状态记录已保留，可重试卸载", outcome.instance);
        }
    }
    Ok(if outcome.rollback.is_clean() { 0 } else { 1 })
}

fn selftest(cli: &Cli, config: &InstallerConfig, instance: &str) -> Result<u8> {
    let host = SystemHost::new(config);
    let report = manage::selftest_instance(config, instance, &host)?;
    if cli.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(if report.is_healthy() { 0 } else { 2 })
}

fn list(cli: &Cli, config: &InstallerConfig) -> Result<u8> {
    let host = SystemHost::new(config);
    let instances = manage::list_instances(&Layout::new(config), &host)?;
    if cli.json {
        print_json(&instances)?;
        return Ok(0);
    }
    if instances.is_empty() {
        println!("未安装任何实例");
    }
    for i in &instances {
        println!(
            "{}\t{}\tport={}\tdomain={}\tservice={}",
            i.name,
            i.product.as_deref().unwrap_or("-"),
            i.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            i.domain.as_deref().unwrap_or("-"),
            if i.service_active { "active" } else { "inactive" }
        );
    }
    Ok(0)
}

fn doctor(cli: &Cli, config: &InstallerConfig) -> Result<u8> {
    let host = SystemHost::new(config);
    let report = manage::doctor(config, &host);
    if cli.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(if report.is_healthy() { 0 } else { 2 })
}

fn service(config: &InstallerConfig, cmd: &ServiceCommands) -> Result<u8> {
    let (instance, command) = match cmd {
        ServiceCommands::Start { instance } => (instance, ServiceCommand::Control(ServiceAction::Start)),
        ServiceCommands::Stop { instance } => (instance, ServiceCommand::Control(ServiceAction::Stop)),
        ServiceCommands::Restart { instance } => {
            (instance, ServiceCommand::Control(ServiceAction::Restart))
        }
        ServiceCommands::Status { instance } => (instance, ServiceCommand::Status),
        ServiceCommands::Logs { instance, lines } => (instance, ServiceCommand::Logs { lines: *lines }),
    };
    if let ServiceCommand::Control(action) = command {
        require_root(&format!("{}服务", action.as_str()))?;
    }
    let host = SystemHost::new(config);
    let text = manage::manage_service(&Layout::new(config), instance, command, &host, &host)?;
    if let ServiceCommand::Control(action) = command {
        info!("{} {} 完成", paths::service_name(instance), action.as_str());
    } else {
        print!("{text}");
    }
    Ok(0)
}

fn ssl(config: &InstallerConfig, cmd: &SslCommands) -> Result<u8> {
    require_root("证书管理")?;
    let host = SystemHost::new(config);
    let text = match cmd {
        SslCommands::Status => host.certificate_status()?,
        SslCommands::Renew { dry_run, force } => {
            let mode = match (*dry_run, *force) {
                (true, _) => RenewMode::DryRun,
                (false, true) => RenewMode::Force,
                (false, false) => RenewMode::Due,
            };
            host.renew_certificates(mode)?
        }
    };
    print!("{text}");
    Ok(0)
}

fn addon(cli: &Cli, config: &InstallerConfig, cmd: &AddonCommands) -> Result<u8> {
    let layout = Layout::new(config);
    match cmd {
        AddonCommands::Install { instance, archive } => {
            require_root("安装插件")?;
            let archive = resolve_arg(archive)?;
            let host = SystemHost::new(config);
            let manager = AddonManager::open(&layout, instance)?;
            let installed = manager.install(&archive, config.timeouts.extract(), &host)?;
            if cli.json {
                print_json(&serde_json::json!({
                    "addon": installed.record,
                    "repackaged": installed.repackaged,
                    "warnings": installed.warnings,
                }))?;
            } else {
                println!("插件已安装: {}", installed.record.path.display());
                for w in &installed.warnings {
                    println!("警告: {w}");
                }
                println!("后续: systemctl restart {}", paths::service_name(instance));
            }
            Ok(0)
        }
        AddonCommands::List { instance } => {
            let records = AddonManager::open(&layout, instance)?.list()?;
            if cli.json {
                print_json(&records)?;
                return Ok(0);
            }
            if records.is_empty() {
                println!("未安装任何插件");
            }
            for r in &records {
                let config = r
                    .config_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\tconfig={}", r.name, config);
            }
            Ok(0)
        }
        AddonCommands::Remove { instance, name } => {
            require_root("删除插件")?;
            AddonManager::open(&layout, instance)?.remove(name)?;
            info!("已删除插件 {}，请重启服务使其生效", name);
            Ok(0)
        }
        AddonCommands::CheckConfig { instance, name } => {
            let check = AddonManager::open(&layout, instance)?.check_config(name)?;
            let code = match &check {
                ConfigCheck::Valid { path } => {
                    println!("配置合法: {}", path.display());
                    0
                }
                ConfigCheck::Invalid { path, message } => {
                    println!("配置不合法: {}\n{}", path.display(), message);
                    1
                }
                ConfigCheck::Missing => {
                    println!("插件 {name} 没有配置文件");
                    0
                }
            };
            Ok(code)
        }
    }
}
