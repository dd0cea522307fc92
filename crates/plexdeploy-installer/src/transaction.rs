//! 安装事务协调器。
//!
//! 步骤（严格按顺序）：
//! `archive_selection → extraction → dependency_install → error_page_creation → database_setup
//!  → web_setup → addon_setup → service_registration → self_test → post_install`
//!
//! 状态规则：
//! - `archive_selection` 无法给出归档/实例时为 `aborted`，不回滚（此时尚未创建任何东西）
//! - 之后任一步骤出错为 `failed`，记录失败步骤与原因，并以当前上下文执行一次回滚
//! - 步骤之间检测到用户中断为 `cancelled`，回滚路径与失败相同
//! - 自检失败不回滚，只体现在健康度上
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use plexdeploy_core::config::{InstallerConfig, ProductSpec};
use plexdeploy_core::context::InstallationContext;
use plexdeploy_core::error::ArchiveError;
use plexdeploy_core::paths::{service_name, validate_instance_name, Layout, ADDONS_DIR, ERROR_PAGE};
use plexdeploy_core::report::{Health, SelfTestReport};
use plexdeploy_core::state::InstanceState;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::{self, ArchiveFormat};
use crate::discovery;
use crate::host::{HealthProbe, PortOpening, Provisioner};
use crate::normalize;
use crate::rollback::{rollback, RollbackReport};
use crate::selftest::{find_app_config, run_self_test};

/// 事务步骤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ArchiveSelection,
    Extraction,
    DependencyInstall,
    ErrorPageCreation,
    DatabaseSetup,
    WebSetup,
    AddonSetup,
    ServiceRegistration,
    SelfTest,
    PostInstall,
}

impl Step {
    /// 执行顺序。
    pub const ORDER: [Step; 10] = [
        Step::ArchiveSelection,
        Step::Extraction,
        Step::DependencyInstall,
        Step::ErrorPageCreation,
        Step::DatabaseSetup,
        Step::WebSetup,
        Step::AddonSetup,
        Step::ServiceRegistration,
        Step::SelfTest,
        Step::PostInstall,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::ArchiveSelection => "archive_selection",
            Step::Extraction => "extraction",
            Step::DependencyInstall => "dependency_install",
            Step::ErrorPageCreation => "error_page_creation",
            Step::DatabaseSetup => "database_setup",
            Step::WebSetup => "web_setup",
            Step::AddonSetup => "addon_setup",
            Step::ServiceRegistration => "service_registration",
            Step::SelfTest => "self_test",
            Step::PostInstall => "post_install",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 事务终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Cancelled,
    Aborted,
}

/// 面向用户的最终结论（区分全部终态）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Healthy,
    HealthyWithWarnings,
    Unhealthy,
    FailedRolledBack,
    CancelledRolledBack,
    Aborted,
}

impl Verdict {
    /// 进程退出码。
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Healthy | Verdict::HealthyWithWarnings => 0,
            Verdict::FailedRolledBack | Verdict::CancelledRolledBack => 1,
            Verdict::Unhealthy => 2,
            Verdict::Aborted => 3,
        }
    }
}

/// 反向代理与证书参数。
#[derive(Debug, Clone)]
pub struct WebRequest {
    pub domain: String,
    pub email: String,
}

/// 一次安装请求（由 CLI 收集）。
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// 产品名（忽略大小写）。
    pub product: String,
    /// 归档路径；为空时在配置的搜索目录中查找。
    pub archive: Option<PathBuf>,
    /// 实例名；为空时自动建议。
    pub instance: Option<String>,
    /// 端口；为空时使用产品默认端口。
    pub port: Option<u16>,
    /// 反向代理与证书；为空时跳过 web_setup。
    pub web: Option<WebRequest>,
    /// 是否开通数据库用户。
    pub setup_database: bool,
    /// 是否注册 systemd 服务。
    pub register_service: bool,
    /// Dashboard 插件归档（仅对提供该选项的产品有效）。
    pub dashboard_archive: Option<PathBuf>,
}

impl InstallRequest {
    pub fn new(product: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            archive: None,
            instance: None,
            port: None,
            web: None,
            setup_database: false,
            register_service: true,
            dashboard_archive: None,
        }
    }
}

/// 协作式取消信号（只在步骤之间检查）。
pub trait CancelSignal {
    fn is_cancelled(&self) -> bool;
}

impl<F: Fn() -> bool> CancelSignal for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// 事务结果。
#[derive(Debug, Clone, Serialize)]
pub struct TransactionOutcome {
    pub status: TransactionStatus,
    pub product: String,
    pub instance: Option<String>,
    pub install_path: Option<PathBuf>,
    /// 失败或被取消时所处的步骤。
    pub failed_step: Option<Step>,
    /// 原始错误（回滚结果单独记录，不会覆盖它）。
    pub error: Option<String>,
    pub rollback: Option<RollbackReport>,
    pub self_test: Option<SelfTestReport>,
    pub warnings: Vec<String>,
    /// 需要用户后续处理的事项。
    pub reminders: Vec<String>,
    pub state_file: Option<PathBuf>,
}

impl TransactionOutcome {
    fn new(product: &str) -> Self {
        Self {
            status: TransactionStatus::Aborted,
            product: product.to_string(),
            instance: None,
            install_path: None,
            failed_step: None,
            error: None,
            rollback: None,
            self_test: None,
            warnings: Vec::new(),
            reminders: Vec::new(),
            state_file: None,
        }
    }

    /// 自检健康度（未执行自检时为 `None`）。
    pub fn health(&self) -> Option<Health> {
        self.self_test.as_ref().map(SelfTestReport::health)
    }

    pub fn verdict(&self) -> Verdict {
        match self.status {
            TransactionStatus::Aborted => Verdict::Aborted,
            TransactionStatus::Failed => Verdict::FailedRolledBack,
            TransactionStatus::Cancelled => Verdict::CancelledRolledBack,
            TransactionStatus::Success => match self.health() {
                Some(Health::Unhealthy) => Verdict::Unhealthy,
                Some(Health::HealthyWithWarnings) => Verdict::HealthyWithWarnings,
                _ => Verdict::Healthy,
            },
        }
    }
}

/// archive_selection 的产出。
#[derive(Debug, Clone)]
struct Selection {
    product: ProductSpec,
    instance: String,
    archive: PathBuf,
    port: u16,
}

/// 单次事务运行期间的可变状态。
struct Run {
    selection: Selection,
    ctx: InstallationContext,
    archive_sha256: Option<String>,
    addons: Vec<String>,
    self_test: Option<SelfTestReport>,
    warnings: Vec<String>,
    reminders: Vec<String>,
    state_file: Option<PathBuf>,
}

/// 安装事务协调器。
pub struct Transaction<'a> {
    config: &'a InstallerConfig,
    layout: Layout,
    provisioner: &'a dyn Provisioner,
    probe: &'a dyn HealthProbe,
    cancel: &'a dyn CancelSignal,
}

impl<'a> Transaction<'a> {
    pub fn new(
        config: &'a InstallerConfig,
        provisioner: &'a dyn Provisioner,
        probe: &'a dyn HealthProbe,
        cancel: &'a dyn CancelSignal,
    ) -> Self {
        Self {
            config,
            layout: Layout::new(config),
            provisioner,
            probe,
            cancel,
        }
    }

    /// 执行一次完整安装。
    ///
    /// 返回值：
    /// - 终态、失败步骤与原因、回滚结果、自检报告；本函数不返回错误
    pub fn run(&self, request: &InstallRequest) -> TransactionOutcome {
        let mut outcome = TransactionOutcome::new(&request.product);

        if self.cancel.is_cancelled() {
            warn!("安装在开始前被取消");
            outcome.status = TransactionStatus::Cancelled;
            outcome.failed_step = Some(Step::ArchiveSelection);
            outcome.error = Some("用户取消".to_string());
            outcome.rollback = Some(RollbackReport::default());
            return outcome;
        }

        info!("[{}] 开始", Step::ArchiveSelection);
        let selection = match self.select(request) {
            Ok(s) => s,
            Err(reason) => {
                warn!("安装中止: {}", reason);
                outcome.error = Some(reason);
                return outcome;
            }
        };

        let mut ctx = InstallationContext::new(
            &selection.product.name,
            &selection.instance,
            self.layout.instance_dir(&selection.instance),
            selection.port,
        );
        if let Some(web) = &request.web {
            ctx = ctx.with_domain(&web.domain, Some(web.email.clone()));
        }
        outcome.instance = Some(selection.instance.clone());
        outcome.install_path = Some(ctx.install_path().to_path_buf());

        let mut run = Run {
            selection,
            ctx,
            archive_sha256: None,
            addons: Vec::new(),
            self_test: None,
            warnings: Vec::new(),
            reminders: Vec::new(),
            state_file: None,
        };

        let mut terminal: Option<(TransactionStatus, Step, String)> = None;
        for step in Step::ORDER.into_iter().skip(1) {
            if self.cancel.is_cancelled() {
                warn!("在 {} 之前收到中断请求", step);
                terminal = Some((TransactionStatus::Cancelled, step, "用户取消".to_string()));
                break;
            }
            info!("[{}] 开始", step);
            if let Err(e) = self.execute(step, request, &mut run) {
                error!("[{}] 失败: {:#}", step, e);
                run.reminders.extend(remediation_for(&e));
                terminal = Some((TransactionStatus::Failed, step, format!("{e:#}")));
                break;
            }
        }

        outcome.warnings = run.warnings;
        outcome.reminders = run.reminders;
        outcome.self_test = run.self_test;
        match terminal {
            None => {
                outcome.status = TransactionStatus::Success;
                outcome.state_file = run.state_file;
            }
            Some((status, step, cause)) => {
                let report = rollback(&run.ctx, self.provisioner);
                for failure in report.failures() {
                    outcome
                        .warnings
                        .push(format!("回滚 {:?} 未完成: {}", failure.step, failure.detail));
                }
                outcome.status = status;
                outcome.failed_step = Some(step);
                outcome.error = Some(cause);
                outcome.rollback = Some(report);
            }
        }
        outcome
    }

    fn select(&self, request: &InstallRequest) -> std::result::Result<Selection, String> {
        let product = self
            .config
            .product(&request.product)
            .cloned()
            .ok_or_else(|| format!("未知产品: {}", request.product))?;

        let instance = request
            .instance
            .clone()
            .unwrap_or_else(|| discovery::suggest_instance_name(&self.layout, &product.name));
        validate_instance_name(&instance).map_err(|e| e.to_string())?;
        if discovery::is_taken(&self.layout, &instance) {
            return Err(format!(
                "实例 '{instance}' 已存在，请先卸载或使用其它实例名"
            ));
        }

        let archive = match &request.archive {
            Some(path) => {
                ArchiveFormat::detect(path).map_err(|e| e.to_string())?;
                if !path.is_file() {
                    return Err(format!("归档不存在: {}", path.display()));
                }
                path.clone()
            }
            None => {
                let found = discovery::find_archives(
                    &self.config.archive_search_dirs,
                    self.config.archive_search_depth,
                    &product.name,
                );
                match found.as_slice() {
                    [] => return Err(format!("未找到 {} 的归档（zip/rar）", product.name)),
                    [only] => only.clone(),
                    many => {
                        let list: Vec<String> = many.iter().map(|p| p.display().to_string()).collect();
                        return Err(format!(
                            "找到多个候选归档，请使用 --archive 指定: {}",
                            list.join(", ")
                        ));
                    }
                }
            }
        };

        let port = request.port.unwrap_or(product.default_port);
        info!(
            "产品 {}，实例 {}，端口 {}，归档 {}",
            product.name,
            instance,
            port,
            archive.display()
        );
        Ok(Selection {
            product,
            instance,
            archive,
            port,
        })
    }

    fn execute(&self, step: Step, request: &InstallRequest, run: &mut Run) -> Result<()> {
        match step {
            Step::ArchiveSelection => Ok(()),
            Step::Extraction => self.extract(run),
            Step::DependencyInstall => self.provisioner.install_dependencies(run.ctx.install_path()),
            Step::ErrorPageCreation => write_error_page(run.ctx.install_path(), &run.selection.product.name),
            Step::DatabaseSetup => self.setup_database(request, run),
            Step::WebSetup => self.setup_web(request, run),
            Step::AddonSetup => self.setup_addons(request, run),
            Step::ServiceRegistration => self.register_service(request, run),
            Step::SelfTest => {
                run.self_test = Some(run_self_test(&run.ctx, self.config, self.probe));
                Ok(())
            }
            Step::PostInstall => self.post_install(run),
        }
    }

    fn extract(&self, run: &mut Run) -> Result<()> {
        let root = self.layout.install_root();
        std::fs::create_dir_all(root)
            .with_context(|| format!("创建安装根目录失败: {}", root.display()))?;
        run.archive_sha256 = Some(archive::sha256_hex(&run.selection.archive)?);

        let incoming = tempfile::Builder::new()
            .prefix(".incoming-")
            .tempdir_in(root)
            .with_context(|| format!("创建暂存目录失败: {}", root.display()))?;
        let extracted = normalize::extract_and_normalize(
            &run.selection.archive,
            incoming.path(),
            self.config.timeouts.extract(),
        )?;
        run.warnings.extend(extracted.warnings);

        let app_root = normalize::locate_app_root(&extracted.folder);
        if app_root != extracted.folder {
            info!("应用根目录位于子目录: {}", app_root.display());
        }
        let target = run.ctx.install_path().to_path_buf();
        std::fs::rename(&app_root, &target)
            .with_context(|| format!("移动到安装目录失败: {}", target.display()))?;
        run.ctx.mark_install_path_ready();
        drop(incoming);

        let perms = self.provisioner.apply_permissions(&target);
        if let Some(hint) = perms.hint(&target) {
            warn!("{}", hint);
            run.warnings.push(hint);
        }
        Ok(())
    }

    fn setup_database(&self, request: &InstallRequest, run: &mut Run) -> Result<()> {
        if request.setup_database {
            let credential = self.provisioner.provision_database(run.ctx.instance_name())?;
            run.reminders.push(format!(
                "数据库连接串已写入 {}，请填入应用配置",
                self.config.credentials_file.display()
            ));
            run.ctx.record_database(credential);
        } else if run.selection.product.requires_database {
            let msg = format!(
                "{} 需要 MongoDB，但未配置数据库：请在应用配置中手动填写连接串",
                run.selection.product.name
            );
            warn!("{}", msg);
            run.warnings.push("已跳过数据库配置".to_string());
            run.reminders.push(msg);
        }
        Ok(())
    }

    fn setup_web(&self, request: &InstallRequest, run: &mut Run) -> Result<()> {
        let Some(web) = &request.web else {
            info!("未指定域名，跳过反向代理与证书");
            return Ok(());
        };
        let port = run.ctx.port();
        match self.provisioner.open_port(port, run.ctx.instance_name())? {
            PortOpening::Added => run.ctx.mark_port_opened(port),
            PortOpening::AlreadyOpen => info!("端口 {} 的放通规则已存在，回滚时不会关闭", port),
        }

        if let Some(warning) = dns_mismatch(&web.domain, self.probe) {
            warn!("{}", warning);
            run.warnings.push(warning);
        }

        self.provisioner
            .configure_site(&web.domain, port, run.ctx.install_path())?;
        run.ctx.mark_nginx_configured();

        self.provisioner.obtain_certificate(&web.domain, &web.email)?;
        run.ctx.mark_ssl_configured();
        Ok(())
    }

    fn setup_addons(&self, request: &InstallRequest, run: &mut Run) -> Result<()> {
        let Some(dashboard) = &request.dashboard_archive else {
            return Ok(());
        };
        if !run.selection.product.has_dashboard_option {
            let msg = format!("{} 不提供 Dashboard 插件，已忽略", run.selection.product.name);
            warn!("{}", msg);
            run.warnings.push(msg);
            return Ok(());
        }
        let addons_dir = run.ctx.install_path().join(ADDONS_DIR);
        let extracted = normalize::extract_and_normalize(dashboard, &addons_dir, self.config.timeouts.extract())?;
        run.warnings.extend(extracted.warnings);
        if extracted.folder.join("package.json").is_file() {
            self.provisioner.install_dependencies(&extracted.folder)?;
        }
        let perms = self.provisioner.apply_permissions(&extracted.folder);
        if let Some(hint) = perms.hint(&extracted.folder) {
            run.warnings.push(hint);
        }
        info!("插件已安装: {}", extracted.name);
        run.addons.push(extracted.name);
        Ok(())
    }

    fn register_service(&self, request: &InstallRequest, run: &mut Run) -> Result<()> {
        if !request.register_service {
            run.reminders.push(format!(
                "未注册服务：手动启动请执行 cd {} && node .",
                run.ctx.install_path().display()
            ));
            return Ok(());
        }
        self.provisioner
            .register_service(run.ctx.instance_name(), run.ctx.install_path())?;
        run.ctx.mark_service_created();
        Ok(())
    }

    fn post_install(&self, run: &mut Run) -> Result<()> {
        let instance = run.ctx.instance_name().to_string();
        let config_file = find_app_config(run.ctx.install_path());
        match &config_file {
            Some(p) => run.reminders.push(format!("配置文件: {}", p.display())),
            None => run.reminders.push("未找到配置文件，请按产品文档创建".to_string()),
        }
        if run.ctx.service_created() {
            let service = service_name(&instance);
            run.reminders.push(format!(
                "修改配置后重启服务: systemctl restart {service}；查看日志: journalctl -u {service} -f"
            ));
        }
        if let Some(domain) = run.ctx.domain() {
            run.reminders.push(format!("访问地址: https://{domain}"));
        }

        let mut state = InstanceState::new(run.ctx.clone());
        state.archive_sha256 = run.archive_sha256.clone();
        state.config_file = config_file;
        state.addons = run.addons.clone();
        let path = self.layout.state_file(&instance);
        state.persist(&path)?;
        info!("实例状态已保存: {}", path.display());
        run.state_file = Some(path);
        Ok(())
    }
}

/// 域名解析结果与本机公网地址不一致时返回警告文本。
fn dns_mismatch(domain: &str, probe: &dyn HealthProbe) -> Option<String> {
    match probe.resolve(domain) {
        Ok(addrs) => match probe.public_ip() {
            Some(ip) if !addrs.contains(&ip) => Some(format!(
                "DNS 不匹配: {domain} 解析到 {addrs:?}，本机公网地址为 {ip}；证书申请可能失败"
            )),
            _ => None,
        },
        Err(e) => Some(format!("DNS 检查失败: {e:#}")),
    }
}

/// 针对归档类错误给出处理建议。
fn remediation_for(err: &anyhow::Error) -> Option<String> {
    let archive_err = err.downcast_ref::<ArchiveError>()?;
    let hint = match archive_err {
        ArchiveError::CorruptArchive { .. } => "归档已损坏或不完整，请重新下载后再试".to_string(),
        ArchiveError::PathTraversal { .. } => {
            "归档包含越界路径，已按恶意输入中止，请勿使用该归档".to_string()
        }
        ArchiveError::ToolMissing { tool } => format!("请先安装 {tool}"),
        ArchiveError::NameCollision { name } => format!("请先移除已存在的 '{name}' 或更换归档文件名"),
        _ => return None,
    };
    Some(hint)
}

/// 写入 502 错误页（权限 0644）。
pub fn write_error_page(dir: &Path, product: &str) -> Result<()> {
    if !dir.is_dir() {
        return Err(anyhow!("安装目录不存在: {}", dir.display()));
    }
    let path = dir.join(ERROR_PAGE);
    std::fs::write(&path, error_page_html(product))
        .with_context(|| format!("写入错误页失败: {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .with_context(|| format!("设置权限失败: {}", path.display()))?;
    }
    Ok(())
}

fn error_page_html(product: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Service Temporarily Unavailable</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
               background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white;
               display: flex; justify-content: center; align-items: center; min-height: 100vh; margin: 0; }}
        .container {{ background: rgba(255, 255, 255, 0.1); border-radius: 20px; padding: 3rem;
                     text-align: center; max-width: 500px; }}
        h1 {{ font-size: 3rem; margin-bottom: 1rem; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>502</h1>
        <h2>Service Temporarily Unavailable</h2>
        <p>{product} is starting up. Please wait...</p>
    </div>
    <script>setTimeout(function(){{ window.location.reload(); }}, 30000);</script>
</body>
</html>
"#
    )
}
