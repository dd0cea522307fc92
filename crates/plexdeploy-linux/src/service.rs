//! systemd 服务单元管理（基于 `systemctl`）。
//!
//! 用途：
//! - 为每个实例生成 `plex-<instance>.service` 单元并启用、启动
//! - 回滚/卸载时停止、禁用并删除单元
//! - 日常运维：启动、停止、重启、查看状态与最近日志
//!
//! 权限要求：
//! - 写入单元目录与调用 `systemctl` 需要 root 权限
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};

use crate::process::{run_checked, run_with_timeout};

/// 生成服务单元文本。
///
/// 参数：
/// - `service_name`：服务名（形如 `plex-<instance>`）
/// - `install_path`：应用目录（`WorkingDirectory`）
pub fn unit_contents(service_name: &str, install_path: &Path) -> String {
    format!(
        "[Unit]\n\
Description=PlexDevelopment - {service_name}\n\
After=network.target nginx.service\n\
\n\
[Service]\n\
Type=simple\n\
User=root\n\
Group=root\n\
WorkingDirectory={dir}\n\
ExecStart=/usr/bin/node .\n\
Restart=on-failure\n\
RestartSec=10\n\
TimeoutStartSec=30s\n\
SyslogIdentifier={service_name}\n\
\n\
[Install]\n\
WantedBy=multi-user.target\n",
        dir = install_path.display()
    )
}

/// 写入单元文件并执行 daemon-reload、enable、start。
///
/// 参数：
/// - `unit_path`：单元文件路径
/// - `service_name`：服务名
/// - `install_path`：应用目录
/// - `timeout`：单条 `systemctl` 命令的超时
///
/// 异常处理：
/// - 任一步骤失败即返回错误（已写入的单元文件由回滚负责删除）
pub fn install_unit(
    unit_path: &Path,
    service_name: &str,
    install_path: &Path,
    timeout: Duration,
) -> Result<()> {
    if let Some(parent) = unit_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("创建单元目录失败: {}", parent.display()))?;
    }
    std::fs::write(unit_path, unit_contents(service_name, install_path))
        .with_context(|| format!("写入服务单元失败: {}", unit_path.display()))?;
    set_mode(unit_path, 0o644)?;

    run_checked("systemctl", &["daemon-reload"], timeout)?;
    run_checked("systemctl", &["enable", service_name], timeout)?;
    run_checked("systemctl", &["start", service_name], timeout)?;
    info!("服务已启动: {}", service_name);
    Ok(())
}

/// 停止、禁用并删除服务单元。
///
/// 说明：
/// - stop/disable 失败仅记录警告（服务可能本就未运行）
/// - 删除单元文件与 daemon-reload 失败会返回错误
pub fn remove_unit(unit_path: &Path, service_name: &str, timeout: Duration) -> Result<()> {
    for action in ["stop", "disable"] {
        match run_with_timeout("systemctl", &[action, service_name], None, timeout) {
            Ok(out) if out.success() => {}
            Ok(out) => warn!("systemctl {} {} 返回 {}: {}", action, service_name, out.status, out.stderr.trim()),
            Err(e) => warn!("systemctl {} {} 失败: {:#}", action, service_name, e),
        }
    }
    if unit_path.exists() {
        std::fs::remove_file(unit_path)
            .with_context(|| format!("删除服务单元失败: {}", unit_path.display()))?;
    }
    run_checked("systemctl", &["daemon-reload"], timeout)?;
    info!("服务已移除: {}", service_name);
    Ok(())
}

/// 服务当前是否处于 active 状态。
pub fn is_active(service_name: &str, timeout: Duration) -> bool {
    run_with_timeout("systemctl", &["is-active", service_name], None, timeout)
        .map(|out| out.stdout.trim() == "active")
        .unwrap_or(false)
}

/// 运维动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

/// 对服务执行启动/停止/重启。
///
/// 异常处理：
/// - `systemctl` 返回非 0：返回错误并附带输出
pub fn control(service_name: &str, action: ServiceAction, timeout: Duration) -> Result<()> {
    run_checked("systemctl", &[action.as_str(), service_name], timeout)?;
    info!("systemctl {} {} 完成", action.as_str(), service_name);
    Ok(())
}

/// `systemctl status` 的输出文本。
///
/// 说明：
/// - 服务未运行时 `systemctl status` 以 3 退出，这里仍返回输出
/// - 单元不存在（退出码 4）返回错误
pub fn status_text(service_name: &str, timeout: Duration) -> Result<String> {
    let out = run_with_timeout(
        "systemctl",
        &["status", "--no-pager", service_name],
        None,
        timeout,
    )?;
    if out.code() == Some(4) {
        return Err(anyhow!("服务单元不存在: {service_name}"));
    }
    Ok(out.stdout)
}

/// 最近 `lines` 行服务日志（`journalctl`）。
pub fn recent_logs(service_name: &str, lines: usize, timeout: Duration) -> Result<String> {
    let n = lines.to_string();
    let out = run_checked(
        "journalctl",
        &["-u", service_name, "-n", &n, "--no-pager"],
        timeout,
    )?;
    Ok(out.stdout)
}

/// 重新加载某个服务（如 nginx）。
pub fn reload(service_name: &str, timeout: Duration) -> Result<()> {
    run_checked("systemctl", &["reload", service_name], timeout)?;
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("设置权限失败: {}", path.display()))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
