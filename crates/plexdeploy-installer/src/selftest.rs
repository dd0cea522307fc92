//! 安装后自检。
//!
//! 说明：
//! - 固定的一组相互独立的检查，单项失败不会中止其它检查
//! - 服务存活与端口可达为有界轮询（固定间隔、固定次数）
//! - 结果只汇报不抛错，也不会触发回滚
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use plexdeploy_core::config::InstallerConfig;
use plexdeploy_core::context::InstallationContext;
use plexdeploy_core::paths::{service_name, Layout};
use plexdeploy_core::report::{CheckStatus, SelfTestReport, SelfTestResult};
use tracing::{info, warn};

use crate::host::HealthProbe;

/// 应用配置文件候选名（按优先级）。
pub const APP_CONFIG_NAMES: [&str; 3] = ["config.yml", "config.yaml", "config.json"];

/// 查找应用配置文件。
pub fn find_app_config(install_path: &Path) -> Option<PathBuf> {
    APP_CONFIG_NAMES
        .iter()
        .map(|n| install_path.join(n))
        .find(|p| p.is_file())
}

/// 对已安装实例执行全部检查。
///
/// 参数：
/// - `ctx`：安装上下文（决定哪些条件检查需要执行）
/// - `config`：安装器配置（Node 最低版本、轮询预算、路径布局）
/// - `probe`：只读探测实现
///
/// 返回值：
/// - 有序的检查结果列表
pub fn run_self_test(
    ctx: &InstallationContext,
    config: &InstallerConfig,
    probe: &dyn HealthProbe,
) -> SelfTestReport {
    let layout = Layout::new(config);
    let mut report = SelfTestReport::new();
    let install_path = ctx.install_path();

    report.push(check_node(config.node_min_major, probe));
    report.push(check_manifest(install_path));
    report.push(check_node_modules(install_path));
    report.push(check_config_file(install_path));

    if ctx.service_created() {
        let service = service_name(ctx.instance_name());
        report.push(check_service(&service, config, probe));
        let port_check = check_port(ctx.port(), config, probe);
        let reachable = port_check.status == CheckStatus::Pass;
        report.push(port_check);
        if reachable {
            report.push(check_http(ctx.port(), probe));
        }
    }

    if let Some(db) = ctx.database() {
        match probe.database_ping(&db.connection_string) {
            Ok(()) => {
                report.push(SelfTestResult::pass(
                    "database_auth",
                    format!("已使用生成的凭据认证 {}", db.database),
                ));
                report.push(match probe.database_write_read(&db.connection_string) {
                    Ok(()) => SelfTestResult::pass("database_write_read", "写入并读回临时文档成功"),
                    Err(e) => SelfTestResult::warn(
                        "database_write_read",
                        format!("无法确认读写: {e:#}"),
                        "检查数据库用户的 readWrite 角色",
                    ),
                });
            }
            Err(e) => report.push(SelfTestResult::fail(
                "database_auth",
                format!("使用生成的凭据认证失败: {e:#}"),
                "确认 MongoDB 正在运行且凭据文件中的连接串正确",
            )),
        }
    }

    if ctx.nginx_configured() {
        if let Some(domain) = ctx.domain() {
            check_web(&mut report, &layout, domain, probe);
        }
    }

    for r in &report.results {
        match r.status {
            CheckStatus::Pass => {}
            CheckStatus::Warn => warn!("自检 {}: {}", r.name, r.detail),
            CheckStatus::Fail => warn!("自检失败 {}: {}", r.name, r.detail),
        }
    }
    info!(
        "自检完成: {} 通过, {} 警告, {} 失败",
        report.count(CheckStatus::Pass),
        report.count(CheckStatus::Warn),
        report.count(CheckStatus::Fail)
    );
    report
}

fn check_node(min_major: u32, probe: &dyn HealthProbe) -> SelfTestResult {
    const NAME: &str = "node_version";
    match probe.node_major() {
        Ok(major) if major >= min_major => {
            SelfTestResult::pass(NAME, format!("Node.js v{major}（要求 >= {min_major}）"))
        }
        Ok(major) => SelfTestResult::fail(
            NAME,
            format!("Node.js v{major} 低于要求的 v{min_major}"),
            format!("升级 Node.js 到 {min_major} 或更高版本"),
        ),
        Err(e) => SelfTestResult::fail(NAME, format!("无法获取 Node.js 版本: {e:#}"), "安装 Node.js"),
    }
}

fn check_manifest(install_path: &Path) -> SelfTestResult {
    const NAME: &str = "package_manifest";
    let manifest = install_path.join("package.json");
    if manifest.is_file() {
        SelfTestResult::pass(NAME, format!("{} 存在", manifest.display()))
    } else {
        SelfTestResult::fail(
            NAME,
            format!("缺少 {}", manifest.display()),
            "确认归档内容完整，必要时重新下载",
        )
    }
}

fn check_node_modules(install_path: &Path) -> SelfTestResult {
    const NAME: &str = "node_modules";
    if install_path.join("node_modules").is_dir() {
        SelfTestResult::pass(NAME, "依赖已安装")
    } else {
        SelfTestResult::warn(
            NAME,
            "未找到 node_modules",
            format!("在 {} 执行 npm install", install_path.display()),
        )
    }
}

fn check_config_file(install_path: &Path) -> SelfTestResult {
    const NAME: &str = "config_file";
    match find_app_config(install_path) {
        Some(p) => SelfTestResult::pass(NAME, format!("配置文件: {}", p.display())),
        None => SelfTestResult::warn(
            NAME,
            "未找到 config.yml/config.yaml/config.json",
            "按产品文档创建配置文件后重启服务",
        ),
    }
}

fn check_service(service: &str, config: &InstallerConfig, probe: &dyn HealthProbe) -> SelfTestResult {
    const NAME: &str = "service_active";
    let attempts = config.selftest.service_attempts.max(1);
    for attempt in 1..=attempts {
        if probe.service_active(service) {
            return SelfTestResult::pass(NAME, format!("{service} 运行中（第 {attempt} 次检查）"));
        }
        if attempt < attempts {
            probe.pause(config.selftest.service_interval());
        }
    }
    SelfTestResult::fail(
        NAME,
        format!("{service} 在 {attempts} 次检查内未进入 active 状态"),
        format!("查看日志: journalctl -u {service} -n 50"),
    )
}

fn check_port(port: u16, config: &InstallerConfig, probe: &dyn HealthProbe) -> SelfTestResult {
    const NAME: &str = "port_reachable";
    let attempts = config.selftest.port_attempts.max(1);
    for attempt in 1..=attempts {
        if probe.port_reachable(port) {
            return SelfTestResult::pass(NAME, format!("127.0.0.1:{port} 可连接（第 {attempt} 次检查）"));
        }
        if attempt < attempts {
            probe.pause(config.selftest.port_interval());
        }
    }
    SelfTestResult::fail(
        NAME,
        format!("127.0.0.1:{port} 在 {attempts} 次检查内不可达"),
        "确认应用配置中的端口与安装时指定的端口一致",
    )
}

fn check_http(port: u16, probe: &dyn HealthProbe) -> SelfTestResult {
    const NAME: &str = "http_probe";
    let url = format!("http://127.0.0.1:{port}/");
    match probe.http_status(&url) {
        Ok(code) => SelfTestResult::pass(NAME, format!("{url} 返回 {code}")),
        Err(e) => SelfTestResult::warn(
            NAME,
            format!("{url} 无响应: {e:#}"),
            "应用可能未暴露根路径，可忽略",
        ),
    }
}

fn check_web(report: &mut SelfTestReport, layout: &Layout, domain: &str, probe: &dyn HealthProbe) {
    report.push(if probe.service_active("nginx") {
        SelfTestResult::pass("nginx_active", "nginx 运行中")
    } else {
        SelfTestResult::fail("nginx_active", "nginx 未运行", "systemctl start nginx")
    });

    let site = layout.site_available(domain);
    report.push(if site.is_file() {
        SelfTestResult::pass("site_config", format!("{} 存在", site.display()))
    } else {
        SelfTestResult::fail(
            "site_config",
            format!("缺少站点配置 {}", site.display()),
            "重新执行安装或手动恢复站点配置",
        )
    });

    let enabled = layout.site_enabled(domain);
    report.push(if enabled.symlink_metadata().is_ok() {
        SelfTestResult::pass("site_enabled", format!("{} 已启用", domain))
    } else {
        SelfTestResult::fail(
            "site_enabled",
            format!("{} 未启用", domain),
            format!("ln -s {} {}", site.display(), enabled.display()),
        )
    });

    report.push(if probe.proxy_syntax_ok() {
        SelfTestResult::pass("nginx_syntax", "nginx -t 通过")
    } else {
        SelfTestResult::fail("nginx_syntax", "nginx -t 未通过", "执行 nginx -t 查看具体错误")
    });

    let cert = layout.certificate(domain);
    report.push(if cert.is_file() {
        SelfTestResult::pass("certificate", format!("{} 存在", cert.display()))
    } else {
        SelfTestResult::warn(
            "certificate",
            format!("未找到证书 {}", cert.display()),
            format!("DNS 生效后执行 certbot --nginx -d {domain}"),
        )
    });

    report.push(match probe.resolve(domain) {
        Ok(addrs) => match probe.public_ip() {
            Some(ip) if !addrs.contains(&ip) => SelfTestResult::warn(
                "dns",
                format!("{domain} 解析到 {addrs:?}，本机公网地址为 {ip}"),
                "检查 DNS A 记录，或等待解析生效",
            ),
            _ => SelfTestResult::pass("dns", format!("{domain} 解析到 {addrs:?}")),
        },
        Err(e) => SelfTestResult::warn(
            "dns",
            format!("{domain} 解析失败: {e:#}"),
            "添加指向本机的 DNS A 记录",
        ),
    });

    report.push(match probe.tls_handshake(domain) {
        Ok(()) => SelfTestResult::pass("tls_handshake", format!("https://{domain} 握手成功")),
        Err(e) => SelfTestResult::warn(
            "tls_handshake",
            format!("https://{domain} 握手失败: {e:#}"),
            "确认证书已签发且 443 端口已放通",
        ),
    });
}
