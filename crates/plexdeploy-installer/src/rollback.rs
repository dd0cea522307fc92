//! 回滚：依据上下文中的副作用标记逆向撤销安装。
//!
//! 顺序（标记为 false 的步骤直接跳过）：
//! 1. 删除服务注册
//! 2. 删除反向代理站点并 reload
//! 3. 删除为域名申请的证书
//! 4. 删除安装目录
//! 5. 关闭本次开放的防火墙端口
//!
//! 每个子步骤独立尽力执行：失败只记录，不影响后续子步骤，整个回滚不会向上抛错。
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use anyhow::{anyhow, Context, Result};
use plexdeploy_core::context::InstallationContext;
use serde::Serialize;
use tracing::{error, info};

use crate::host::Provisioner;

/// 回滚子步骤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStep {
    Service,
    ProxySite,
    Certificate,
    InstallDirectory,
    FirewallPort,
}

/// 单个子步骤的结果。
#[derive(Debug, Clone, Serialize)]
pub struct RollbackAction {
    pub step: RollbackStep,
    pub ok: bool,
    pub detail: String,
}

/// 回滚结果汇总。
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    pub actions: Vec<RollbackAction>,
}

impl RollbackReport {
    /// 全部已尝试的子步骤是否都成功。
    pub fn is_clean(&self) -> bool {
        self.actions.iter().all(|a| a.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RollbackAction> {
        self.actions.iter().filter(|a| !a.ok)
    }

    pub fn attempted(&self, step: RollbackStep) -> bool {
        self.actions.iter().any(|a| a.step == step)
    }

    fn record(&mut self, step: RollbackStep, result: Result<String>) {
        match result {
            Ok(detail) => {
                info!("回滚 {:?}: {}", step, detail);
                self.actions.push(RollbackAction {
                    step,
                    ok: true,
                    detail,
                });
            }
            Err(e) => {
                let detail = format!("{e:#}");
                error!("回滚 {:?} 失败（继续后续步骤）: {}", step, detail);
                self.actions.push(RollbackAction {
                    step,
                    ok: false,
                    detail,
                });
            }
        }
    }
}

/// 依据上下文回滚。
///
/// 参数：
/// - `ctx`：事务上下文（只读取其中的标记）
/// - `provisioner`：执行逆操作的宿主协作者
///
/// 返回值：
/// - 每个已尝试子步骤的结果；不会返回错误
pub fn rollback(ctx: &InstallationContext, provisioner: &dyn Provisioner) -> RollbackReport {
    let mut report = RollbackReport::default();
    if !ctx.has_side_effects() {
        info!("无需回滚：未记录任何副作用");
        return report;
    }
    info!("开始回滚实例: {}", ctx.instance_name());

    if ctx.service_created() {
        let instance = ctx.instance_name();
        report.record(
            RollbackStep::Service,
            provisioner
                .remove_service(instance)
                .map(|_| format!("已删除服务 plex-{instance}")),
        );
    }

    if ctx.nginx_configured() {
        let result = require_domain(ctx).and_then(|domain| {
            provisioner
                .remove_site(domain)
                .map(|_| format!("已删除站点 {domain}"))
        });
        report.record(RollbackStep::ProxySite, result);
    }

    if ctx.ssl_configured() {
        let result = require_domain(ctx).and_then(|domain| {
            provisioner
                .delete_certificate(domain)
                .map(|_| format!("已删除证书 {domain}"))
        });
        report.record(RollbackStep::Certificate, result);
    }

    if ctx.install_path_ready() {
        let path = ctx.install_path();
        let result = if path.exists() {
            std::fs::remove_dir_all(path)
                .with_context(|| format!("删除安装目录失败: {}", path.display()))
                .map(|_| format!("已删除 {}", path.display()))
        } else {
            Ok(format!("目录已不存在: {}", path.display()))
        };
        report.record(RollbackStep::InstallDirectory, result);
    }

    if let Some(port) = ctx.opened_port() {
        report.record(
            RollbackStep::FirewallPort,
            provisioner
                .close_port(port)
                .map(|_| format!("已关闭端口 {port}")),
        );
    }

    report
}

fn require_domain(ctx: &InstallationContext) -> Result<&str> {
    ctx.domain()
        .ok_or_else(|| anyhow!("上下文缺少域名，无法定位站点/证书"))
}
