//! TLS 证书管理（基于 certbot 的 nginx 插件）。
//!
//! 说明：
//! - 安装时签发、卸载时删除单个域名的证书
//! - 运维时查看全部证书状态、续期（可先演练）
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::process::run_checked;
use crate::service;

/// 为域名申请证书并让 certbot 改写 nginx 站点（强制 HTTPS 跳转）。
///
/// 参数：
/// - `domain`：域名
/// - `email`：证书联系邮箱
/// - `timeout`：certbot 超时
///
/// 异常处理：
/// - certbot 失败返回错误（常见原因：DNS 未生效、80/443 端口不通）
pub fn obtain_certificate(domain: &str, email: &str, timeout: Duration) -> Result<()> {
    run_checked(
        "certbot",
        &[
            "--nginx",
            "-d",
            domain,
            "--non-interactive",
            "--agree-tos",
            "--email",
            email,
            "--redirect",
            "--keep-until-expiring",
        ],
        timeout,
    )
    .with_context(|| format!("申请证书失败（请检查 DNS 记录与 80/443 端口）: {domain}"))?;
    info!("证书已签发: {}", domain);
    Ok(())
}

/// 删除域名对应的证书。
pub fn delete_certificate(domain: &str, timeout: Duration) -> Result<()> {
    run_checked(
        "certbot",
        &["delete", "--cert-name", domain, "--non-interactive"],
        timeout,
    )
    .with_context(|| format!("删除证书失败: {domain}"))?;
    info!("证书已删除: {}", domain);
    Ok(())
}

/// 续期方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewMode {
    /// 只续期临近到期的证书。
    Due,
    /// 演练，不写入任何证书。
    DryRun,
    /// 立即续期全部证书。
    Force,
}

impl RenewMode {
    fn args(self) -> &'static [&'static str] {
        match self {
            Self::Due => &["renew", "--non-interactive"],
            Self::DryRun => &["renew", "--dry-run", "--non-interactive"],
            Self::Force => &["renew", "--force-renewal", "--non-interactive"],
        }
    }
}

/// `certbot certificates` 的输出（域名、到期时间、证书路径）。
pub fn certificates(timeout: Duration) -> Result<String> {
    let out = run_checked("certbot", &["certificates"], timeout).context("查询证书失败")?;
    Ok(out.stdout)
}

/// 续期证书；实际续期后 reload nginx 使新证书生效。
///
/// 返回值：
/// - certbot 的输出
///
/// 异常处理：
/// - certbot 失败：返回错误
/// - nginx reload 失败：返回错误（证书已续期，需手动 reload）
pub fn renew(mode: RenewMode, timeout: Duration) -> Result<String> {
    let out = run_checked("certbot", mode.args(), timeout).context("证书续期失败")?;
    if mode != RenewMode::DryRun {
        service::reload("nginx", timeout).context("证书已续期，但 reload nginx 失败")?;
    }
    info!("证书续期完成 ({:?})", mode);
    Ok(out.stdout)
}
