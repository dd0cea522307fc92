//! 已安装实例的管理：卸载、独立自检、服务运维、列表与环境诊断。
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use plexdeploy_core::config::InstallerConfig;
use plexdeploy_core::paths::{service_name, validate_instance_name, Layout};
use plexdeploy_core::report::{SelfTestReport, SelfTestResult};
use plexdeploy_core::state::InstanceState;
use plexdeploy_linux::elevation;
use plexdeploy_linux::prereq::{tool_status, PrereqStatus};
use serde::Serialize;
use tracing::{info, warn};

use crate::host::{HealthProbe, Provisioner, ServiceAction};
use crate::rollback::{rollback, RollbackReport};
use crate::selftest::run_self_test;

/// 卸载结果。
#[derive(Debug, Clone, Serialize)]
pub struct UninstallOutcome {
    pub instance: String,
    pub rollback: RollbackReport,
    /// 状态记录是否已删除（回滚有失败项时保留，便于重试）。
    pub state_removed: bool,
}

/// 按实例状态记录回滚整个实例。
///
/// 异常处理：
/// - 状态记录不存在或无法解析：返回错误（不会尝试猜测需要清理什么）
pub fn uninstall(
    layout: &Layout,
    instance: &str,
    provisioner: &dyn Provisioner,
) -> Result<UninstallOutcome> {
    let path = layout.state_file(instance);
    let state = InstanceState::load(&path)?;
    info!("卸载实例 {}（安装于 {}）", instance, state.installed_at);

    let report = rollback(&state.context, provisioner);
    let state_removed = if report.is_clean() {
        std::fs::remove_file(&path)
            .with_context(|| format!("删除状态记录失败: {}", path.display()))?;
        true
    } else {
        warn!("部分清理未完成，保留状态记录以便重试: {}", path.display());
        false
    };
    Ok(UninstallOutcome {
        instance: instance.to_string(),
        rollback: report,
        state_removed,
    })
}

/// 对已安装实例重新执行自检。
pub fn selftest_instance(
    config: &InstallerConfig,
    instance: &str,
    probe: &dyn HealthProbe,
) -> Result<SelfTestReport> {
    let layout = Layout::new(config);
    let state = InstanceState::load(&layout.state_file(instance))?;
    Ok(run_self_test(&state.context, config, probe))
}

/// 服务运维命令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Control(ServiceAction),
    Status,
    Logs { lines: usize },
}

/// 对已安装实例的 systemd 服务执行运维命令。
///
/// 参数：
/// - `layout`：路径布局（用于定位状态记录）
/// - `instance`：实例名
/// - `command`：启动/停止/重启、状态或最近日志
///
/// 返回值：
/// - 状态与日志命令返回展示文本；启停类命令返回空串
///
/// 异常处理：
/// - 实例名不合法或没有状态记录：返回错误
/// - 实例安装时未注册服务：返回错误
pub fn manage_service(
    layout: &Layout,
    instance: &str,
    command: ServiceCommand,
    provisioner: &dyn Provisioner,
    probe: &dyn HealthProbe,
) -> Result<String> {
    validate_instance_name(instance)?;
    let state = InstanceState::load(&layout.state_file(instance))?;
    if !state.context.service_created() {
        return Err(anyhow!("实例 {instance} 未注册 systemd 服务"));
    }
    let name = service_name(instance);
    match command {
        ServiceCommand::Control(action) => {
            provisioner.control_service(instance, action)?;
            Ok(String::new())
        }
        ServiceCommand::Status => probe.service_status(&name),
        ServiceCommand::Logs { lines } => probe.service_logs(&name, lines),
    }
}

/// 实例概要。
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSummary {
    pub name: String,
    pub path: PathBuf,
    pub product: Option<String>,
    pub port: Option<u16>,
    pub domain: Option<String>,
    pub service_active: bool,
}

/// 列出安装根目录下的实例。
pub fn list_instances(layout: &Layout, probe: &dyn HealthProbe) -> Result<Vec<InstanceSummary>> {
    let mut out = Vec::new();
    for name in layout.list_instances()? {
        let state = InstanceState::load(&layout.state_file(&name)).ok();
        let ctx = state.as_ref().map(|s| &s.context);
        out.push(InstanceSummary {
            path: layout.instance_dir(&name),
            product: ctx.map(|c| c.product().to_string()),
            port: ctx.map(|c| c.port()),
            domain: ctx.and_then(|c| c.domain().map(str::to_string)),
            service_active: probe.service_active(&service_name(&name)),
            name,
        });
    }
    Ok(out)
}

/// 运行环境诊断（root、Node.js 版本、外部工具）。
pub fn doctor(config: &InstallerConfig, probe: &dyn HealthProbe) -> SelfTestReport {
    let mut report = SelfTestReport::new();
    report.push(if elevation::is_root() {
        SelfTestResult::pass("root", "以 root 运行")
    } else {
        SelfTestResult::fail("root", "未以 root 运行", "使用 sudo 执行")
    });

    report.push(match probe.node_major() {
        Ok(m) if m >= config.node_min_major => SelfTestResult::pass("node", format!("Node.js v{m}")),
        Ok(m) => SelfTestResult::fail(
            "node",
            format!("Node.js v{m} 低于 v{}", config.node_min_major),
            "升级 Node.js",
        ),
        Err(e) => SelfTestResult::fail("node", format!("{e:#}"), "安装 Node.js"),
    });

    for (tool, required) in [
        ("npm", true),
        ("systemctl", true),
        ("nginx", false),
        ("certbot", false),
        ("mongosh", false),
        ("unrar", false),
    ] {
        report.push(match (tool_status(tool), required) {
            (PrereqStatus::Installed, _) => SelfTestResult::pass(tool, "已安装"),
            (PrereqStatus::Missing, true) => {
                SelfTestResult::fail(tool, "未安装", format!("安装 {tool}"))
            }
            (PrereqStatus::Missing, false) => {
                SelfTestResult::warn(tool, "未安装（相关功能不可用）", format!("安装 {tool}"))
            }
        });
    }

    let firewall = ["ufw", "firewall-cmd", "iptables"]
        .into_iter()
        .find(|t| tool_status(t) == PrereqStatus::Installed);
    report.push(match firewall {
        Some(t) => SelfTestResult::pass("firewall", format!("使用 {t}")),
        None => SelfTestResult::warn("firewall", "未找到防火墙工具", "安装 ufw"),
    });
    report
}
