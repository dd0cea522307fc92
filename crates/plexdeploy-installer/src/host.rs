//! 宿主系统协作者接口。
//!
//! 说明：
//! - [`Provisioner`]：安装事务中会修改宿主状态的操作及其逆操作
//! - [`HealthProbe`]：自检使用的只读探测
//! - [`SystemHost`]：基于 `plexdeploy-linux` 的真实实现；测试中以记录型替身注入
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use plexdeploy_core::config::{DatabaseConfig, InstallerConfig, TimeoutConfig};
use plexdeploy_core::context::DatabaseCredential;
use plexdeploy_core::paths::{service_name, Layout};
use plexdeploy_linux::database::{self, MongoServer};
use plexdeploy_linux::permissions::{self, PermissionOutcome};
use plexdeploy_linux::{elevation, firewall, nginx, prereq, probe, service, tls};
use tracing::{info, warn};

pub use plexdeploy_linux::firewall::PortOpening;
pub use plexdeploy_linux::service::ServiceAction;
pub use plexdeploy_linux::tls::RenewMode;

/// 会修改宿主状态的操作。
///
/// 约定：
/// - 每个方法只在副作用确认完成后返回 `Ok`
/// - 逆操作（`remove_*`/`close_port`/`delete_certificate`）对“本就不存在”的情况应尽量返回 `Ok`
pub trait Provisioner {
    /// 在应用目录安装 npm 依赖。
    fn install_dependencies(&self, app_dir: &Path) -> Result<()>;
    /// 设置目录树权限。
    fn apply_permissions(&self, root: &Path) -> PermissionOutcome;
    /// 为实例开通数据库用户，并写入凭据文件。
    fn provision_database(&self, instance: &str) -> Result<DatabaseCredential>;
    /// 放通端口；规则原本存在时返回 [`PortOpening::AlreadyOpen`]。
    fn open_port(&self, port: u16, comment: &str) -> Result<PortOpening>;
    fn close_port(&self, port: u16) -> Result<()>;
    /// 写入并启用反向代理站点，校验语法后 reload。
    fn configure_site(&self, domain: &str, port: u16, error_page_root: &Path) -> Result<()>;
    /// 删除站点并 reload。
    fn remove_site(&self, domain: &str) -> Result<()>;
    fn obtain_certificate(&self, domain: &str, email: &str) -> Result<()>;
    fn delete_certificate(&self, domain: &str) -> Result<()>;
    /// 写入服务单元并启用、启动。
    fn register_service(&self, instance: &str, install_path: &Path) -> Result<()>;
    fn remove_service(&self, instance: &str) -> Result<()>;
    /// 启动/停止/重启实例服务。
    fn control_service(&self, instance: &str, action: ServiceAction) -> Result<()>;
    /// 续期证书，返回 certbot 输出。
    fn renew_certificates(&self, mode: RenewMode) -> Result<String>;
}

/// 自检使用的只读探测。
pub trait HealthProbe {
    /// Node.js 主版本号。
    fn node_major(&self) -> Result<u32>;
    fn service_active(&self, service: &str) -> bool;
    fn port_reachable(&self, port: u16) -> bool;
    /// 发起 HTTP GET 并返回状态码。
    fn http_status(&self, url: &str) -> Result<u16>;
    fn database_ping(&self, connection_string: &str) -> Result<()>;
    fn database_write_read(&self, connection_string: &str) -> Result<()>;
    fn proxy_syntax_ok(&self) -> bool;
    fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>>;
    /// 本机公网地址（无法确定时为 `None`）。
    fn public_ip(&self) -> Option<IpAddr>;
    fn tls_handshake(&self, domain: &str) -> Result<()>;
    /// 轮询间隔等待（测试替身可直接返回）。
    fn pause(&self, duration: Duration);
    fn service_status(&self, service: &str) -> Result<String>;
    fn service_logs(&self, service: &str, lines: usize) -> Result<String>;
    /// 已签发证书的概况。
    fn certificate_status(&self) -> Result<String>;
}

/// 真实宿主实现。
#[derive(Debug, Clone)]
pub struct SystemHost {
    layout: Layout,
    timeouts: TimeoutConfig,
    database: DatabaseConfig,
    credentials_file: std::path::PathBuf,
}

impl SystemHost {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            layout: Layout::new(config),
            timeouts: config.timeouts.clone(),
            database: config.database.clone(),
            credentials_file: config.credentials_file.clone(),
        }
    }
}

impl Provisioner for SystemHost {
    fn install_dependencies(&self, app_dir: &Path) -> Result<()> {
        prereq::npm_install(app_dir, self.timeouts.npm_install())
    }

    fn apply_permissions(&self, root: &Path) -> PermissionOutcome {
        permissions::apply_tree_permissions(root, elevation::is_root())
    }

    fn provision_database(&self, instance: &str) -> Result<DatabaseCredential> {
        let server = MongoServer {
            host: self.database.host.clone(),
            port: self.database.port,
        };
        let credential = database::provision_user(
            &server,
            instance,
            self.database.user_create_attempts,
            Duration::from_millis(self.database.user_create_backoff_ms),
            self.timeouts.database(),
        )?;
        database::append_credentials(&self.credentials_file, instance, &credential)?;
        info!("数据库凭据已写入: {}", self.credentials_file.display());
        Ok(credential)
    }

    fn open_port(&self, port: u16, comment: &str) -> Result<PortOpening> {
        firewall::open_port(port, comment, self.timeouts.firewall())
    }

    fn close_port(&self, port: u16) -> Result<()> {
        firewall::close_port(port, self.timeouts.firewall())
    }

    fn configure_site(&self, domain: &str, port: u16, error_page_root: &Path) -> Result<()> {
        let available = self.layout.site_available(domain);
        let enabled = self.layout.site_enabled(domain);
        let contents = nginx::site_contents(domain, port, error_page_root);
        nginx::configure_site(&available, &enabled, &contents, self.timeouts.nginx()).inspect_err(|_| {
            // 未确认成功的站点不能留在 sites-enabled 中
            if let Err(e) = nginx::remove_site(&available, &enabled) {
                warn!("清理未生效的站点失败: {:#}", e);
            }
        })
    }

    fn remove_site(&self, domain: &str) -> Result<()> {
        nginx::remove_site(&self.layout.site_available(domain), &self.layout.site_enabled(domain))?;
        service::reload("nginx", self.timeouts.nginx())
    }

    fn obtain_certificate(&self, domain: &str, email: &str) -> Result<()> {
        tls::obtain_certificate(domain, email, self.timeouts.certbot())
    }

    fn delete_certificate(&self, domain: &str) -> Result<()> {
        tls::delete_certificate(domain, self.timeouts.certbot())
    }

    fn register_service(&self, instance: &str, install_path: &Path) -> Result<()> {
        let unit = self.layout.unit_file(instance);
        let name = service_name(instance);
        service::install_unit(&unit, &name, install_path, self.timeouts.service()).inspect_err(|_| {
            if let Err(e) = service::remove_unit(&unit, &name, self.timeouts.service()) {
                warn!("清理未生效的服务单元失败: {:#}", e);
            }
        })
    }

    fn remove_service(&self, instance: &str) -> Result<()> {
        service::remove_unit(
            &self.layout.unit_file(instance),
            &service_name(instance),
            self.timeouts.service(),
        )
    }

    fn control_service(&self, instance: &str, action: ServiceAction) -> Result<()> {
        service::control(&service_name(instance), action, self.timeouts.service())
    }

    fn renew_certificates(&self, mode: RenewMode) -> Result<String> {
        tls::renew(mode, self.timeouts.certbot())
    }
}

impl HealthProbe for SystemHost {
    fn node_major(&self) -> Result<u32> {
        let version = prereq::node_version(self.timeouts.probe())?;
        prereq::parse_node_major(&version).ok_or_else(|| anyhow!("无法解析 Node.js 版本: {version}"))
    }

    fn service_active(&self, service: &str) -> bool {
        service::is_active(service, self.timeouts.probe())
    }

    fn port_reachable(&self, port: u16) -> bool {
        probe::tcp_reachable(port, self.timeouts.probe())
    }

    fn http_status(&self, url: &str) -> Result<u16> {
        probe::http_status(url, self.timeouts.probe())
    }

    fn database_ping(&self, connection_string: &str) -> Result<()> {
        database::ping(connection_string, self.timeouts.database())
    }

    fn database_write_read(&self, connection_string: &str) -> Result<()> {
        database::write_read_check(connection_string, self.timeouts.database())
    }

    fn proxy_syntax_ok(&self) -> bool {
        nginx::syntax_ok(self.timeouts.nginx())
    }

    fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>> {
        Ok(probe::resolve(domain)?.into_iter().collect())
    }

    fn public_ip(&self) -> Option<IpAddr> {
        probe::public_ip(self.timeouts.probe())
    }

    fn tls_handshake(&self, domain: &str) -> Result<()> {
        probe::tls_handshake(domain, self.timeouts.probe())
    }

    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn service_status(&self, service: &str) -> Result<String> {
        service::status_text(service, self.timeouts.probe())
    }

    fn service_logs(&self, service: &str, lines: usize) -> Result<String> {
        service::recent_logs(service, lines, self.timeouts.probe())
    }

    fn certificate_status(&self) -> Result<String> {
        tls::certificates(self.timeouts.certbot())
    }
}
