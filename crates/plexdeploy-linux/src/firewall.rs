//! 防火墙端口管理（ufw → firewalld → iptables，按可用性选择）。
//!
//! 说明：
//! - 只放通/关闭单个 TCP 端口
//! - 放通前先查询规则是否已存在，已存在时不做改动，调用方据此决定回滚时是否关闭
//! - iptables 规则重启后可能不保留，此时会记录警告
//!
//! 权限要求：
//! - 需要 root 权限
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::process::{run_checked, run_with_timeout};

/// 可用的防火墙前端。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallBackend {
    Ufw,
    Firewalld,
    Iptables,
}

impl FirewallBackend {
    /// 按优先级探测当前主机可用的防火墙前端。
    pub fn detect() -> Option<Self> {
        if which::which("ufw").is_ok() {
            Some(Self::Ufw)
        } else if which::which("firewall-cmd").is_ok() {
            Some(Self::Firewalld)
        } else if which::which("iptables").is_ok() {
            Some(Self::Iptables)
        } else {
            None
        }
    }
}

/// 放通端口的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOpening {
    /// 本次新增了放通规则。
    Added,
    /// 规则此前已存在，未做改动。
    AlreadyOpen,
}

/// 放通 TCP 端口。
///
/// 参数：
/// - `port`：端口号
/// - `comment`：规则备注（仅 ufw 支持）
///
/// 返回值：
/// - [`PortOpening::Added`]：本次新增了规则，回滚时应关闭
/// - [`PortOpening::AlreadyOpen`]：规则原本就存在，回滚时不应触碰
///
/// 异常处理：
/// - 未找到任何防火墙工具：返回错误
/// - 命令失败：返回错误并附带输出
pub fn open_port(port: u16, comment: &str, timeout: Duration) -> Result<PortOpening> {
    let backend = FirewallBackend::detect().ok_or_else(|| anyhow!("未找到可用的防火墙工具（ufw/firewall-cmd/iptables）"))?;
    if rule_exists(backend, port, timeout)? {
        info!("端口 {} 已放通 ({:?})，保持现有规则", port, backend);
        return Ok(PortOpening::AlreadyOpen);
    }
    let spec = format!("{port}/tcp");
    match backend {
        FirewallBackend::Ufw => {
            run_checked("ufw", &["allow", &spec, "comment", comment], timeout)?;
        }
        FirewallBackend::Firewalld => {
            run_checked("firewall-cmd", &["--permanent", &format!("--add-port={spec}")], timeout)?;
            run_checked("firewall-cmd", &["--reload"], timeout)?;
        }
        FirewallBackend::Iptables => {
            let p = port.to_string();
            run_checked(
                "iptables",
                &["-A", "INPUT", "-p", "tcp", "--dport", &p, "-j", "ACCEPT"],
                timeout,
            )?;
            warn!("iptables 规则重启后可能失效，请自行持久化");
        }
    }
    info!("已放通端口 {} ({:?})", port, backend);
    Ok(PortOpening::Added)
}

/// 查询端口的放通规则是否已存在。
fn rule_exists(backend: FirewallBackend, port: u16, timeout: Duration) -> Result<bool> {
    let spec = format!("{port}/tcp");
    match backend {
        FirewallBackend::Ufw => {
            let out = run_checked("ufw", &["status"], timeout)?;
            Ok(ufw_allows(&out.stdout, port))
        }
        // --query-port / -C 以退出码表示是否存在
        FirewallBackend::Firewalld => {
            let out = run_with_timeout(
                "firewall-cmd",
                &["--permanent", &format!("--query-port={spec}")],
                None,
                timeout,
            )?;
            Ok(out.success())
        }
        FirewallBackend::Iptables => {
            let p = port.to_string();
            let out = run_with_timeout(
                "iptables",
                &["-C", "INPUT", "-p", "tcp", "--dport", &p, "-j", "ACCEPT"],
                None,
                timeout,
            )?;
            Ok(out.success())
        }
    }
}

/// 解析 `ufw status` 输出，判断端口是否已有 ALLOW 规则。
pub fn ufw_allows(status: &str, port: u16) -> bool {
    let spec = format!("{port}/tcp");
    status.lines().any(|line| {
        let mut cols = line.split_whitespace();
        cols.next() == Some(spec.as_str()) && cols.next() == Some("ALLOW")
    })
}

/// 关闭此前放通的 TCP 端口。
pub fn close_port(port: u16, timeout: Duration) -> Result<()> {
    let backend = FirewallBackend::detect().ok_or_else(|| anyhow!("未找到可用的防火墙工具（ufw/firewall-cmd/iptables）"))?;
    let spec = format!("{port}/tcp");
    match backend {
        FirewallBackend::Ufw => {
            run_checked("ufw", &["delete", "allow", &spec], timeout)?;
        }
        FirewallBackend::Firewalld => {
            run_checked("firewall-cmd", &["--permanent", &format!("--remove-port={spec}")], timeout)?;
            run_checked("firewall-cmd", &["--reload"], timeout)?;
        }
        FirewallBackend::Iptables => {
            let p = port.to_string();
            run_checked(
                "iptables",
                &["-D", "INPUT", "-p", "tcp", "--dport", &p, "-j", "ACCEPT"],
                timeout,
            )?;
        }
    }
    info!("已关闭端口 {} ({:?})", port, backend);
    Ok(())
}
