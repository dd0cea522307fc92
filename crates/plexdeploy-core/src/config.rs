//! 安装器配置（installer-config.json）与产品目录定义。
//!
//! 该模块描述安装器运行所需的全部“环境输入”：
//! - 宿主目录约定（安装根目录、nginx 站点目录、systemd 单元目录等）
//! - 超时与轮询预算（子进程超时、自检重试次数与间隔）
//! - 可安装的产品目录（默认端口、是否需要数据库等）
//!
//! 约定：
//! - 所有字段均通过 `#[serde(default)]` 提供默认值，配置文件只需覆盖关心的字段
//! - 配置值在构造各组件时显式传入，不存在全局可变配置
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 安装器配置根对象。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// 实例安装根目录（每个实例一个子目录）。
    pub install_root: PathBuf,
    /// nginx `sites-available` 目录。
    pub nginx_available: PathBuf,
    /// nginx `sites-enabled` 目录。
    pub nginx_enabled: PathBuf,
    /// systemd 单元文件目录。
    pub systemd_unit_dir: PathBuf,
    /// certbot 证书目录（`<dir>/<domain>/fullchain.pem`）。
    pub letsencrypt_live: PathBuf,
    /// 实例状态记录目录（每个实例一个 JSON 文件）。
    pub state_dir: PathBuf,
    /// 数据库凭据文件（权限 0600，每个实例追加一条记录）。
    pub credentials_file: PathBuf,
    /// 主机级互斥锁文件。
    pub lock_file: PathBuf,
    /// 未指定归档路径时的搜索目录。
    pub archive_search_dirs: Vec<PathBuf>,
    /// 归档搜索的最大递归深度。
    pub archive_search_depth: usize,
    /// Node.js 最低主版本号。
    pub node_min_major: u32,
    /// 超时设置。
    pub timeouts: TimeoutConfig,
    /// 自检轮询预算。
    pub selftest: SelfTestConfig,
    /// 数据库配置（本机 MongoDB）。
    pub database: DatabaseConfig,
    /// 产品目录。
    pub products: Vec<ProductSpec>,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("/var/www/plex"),
            nginx_available: PathBuf::from("/etc/nginx/sites-available"),
            nginx_enabled: PathBuf::from("/etc/nginx/sites-enabled"),
            systemd_unit_dir: PathBuf::from("/etc/systemd/system"),
            letsencrypt_live: PathBuf::from("/etc/letsencrypt/live"),
            state_dir: PathBuf::from("/etc/plex/instances"),
            credentials_file: PathBuf::from("/etc/plex/credentials"),
            lock_file: PathBuf::from("/run/plexdeploy.lock"),
            archive_search_dirs: vec![
                PathBuf::from("/root"),
                PathBuf::from("/tmp"),
                PathBuf::from("/var/tmp"),
            ],
            archive_search_depth: 3,
            node_min_major: 20,
            timeouts: TimeoutConfig::default(),
            selftest: SelfTestConfig::default(),
            database: DatabaseConfig::default(),
            products: default_products(),
        }
    }
}

impl InstallerConfig {
    /// 读取并解析配置文件（JSON）。
    ///
    /// 参数：
    /// - `path`：配置文件路径
    ///
    /// 异常处理：
    /// - 文件读取失败（不存在/权限/IO）返回错误
    /// - JSON 解析失败返回错误
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("读取配置失败: {}", path.display()))?;
        let config: InstallerConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("解析配置 JSON 失败: {}", path.display()))?;
        Ok(config)
    }

    /// 读取配置；未提供路径时使用默认值。
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// 按名称（忽略大小写）查找产品定义。
    pub fn product(&self, name: &str) -> Option<&ProductSpec> {
        self.products
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// 外部命令超时（秒）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// 解压工具（unrar）。
    pub extract_secs: u64,
    /// `npm install`。
    pub npm_install_secs: u64,
    /// systemctl 等服务管理命令。
    pub service_secs: u64,
    /// nginx 语法检查与重载。
    pub nginx_secs: u64,
    /// certbot 申请/删除证书。
    pub certbot_secs: u64,
    /// 防火墙命令。
    pub firewall_secs: u64,
    /// mongosh 单次调用。
    pub database_secs: u64,
    /// HTTP/TLS 探测。
    pub probe_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            extract_secs: 300,
            npm_install_secs: 900,
            service_secs: 60,
            nginx_secs: 30,
            certbot_secs: 180,
            firewall_secs: 30,
            database_secs: 30,
            probe_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn extract(&self) -> Duration {
        Duration::from_secs(self.extract_secs)
    }

    pub fn npm_install(&self) -> Duration {
        Duration::from_secs(self.npm_install_secs)
    }

    pub fn service(&self) -> Duration {
        Duration::from_secs(self.service_secs)
    }

    pub fn nginx(&self) -> Duration {
        Duration::from_secs(self.nginx_secs)
    }

    pub fn certbot(&self) -> Duration {
        Duration::from_secs(self.certbot_secs)
    }

    pub fn firewall(&self) -> Duration {
        Duration::from_secs(self.firewall_secs)
    }

    pub fn database(&self) -> Duration {
        Duration::from_secs(self.database_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

/// 自检轮询预算。
///
/// 说明：
/// - 服务存活与端口可达检查均为“固定间隔 + 固定次数”的有界轮询
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfTestConfig {
    /// 服务存活检查的最大次数。
    pub service_attempts: u32,
    /// 服务存活检查间隔（毫秒）。
    pub service_interval_ms: u64,
    /// 端口可达检查的最大次数。
    pub port_attempts: u32,
    /// 端口可达检查间隔（毫秒）。
    pub port_interval_ms: u64,
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            service_attempts: 10,
            service_interval_ms: 2000,
            port_attempts: 15,
            port_interval_ms: 2000,
        }
    }
}

impl SelfTestConfig {
    pub fn service_interval(&self) -> Duration {
        Duration::from_millis(self.service_interval_ms)
    }

    pub fn port_interval(&self) -> Duration {
        Duration::from_millis(self.port_interval_ms)
    }
}

/// 本机数据库（MongoDB）配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 数据库主机。
    pub host: String,
    /// 数据库端口。
    pub port: u16,
    /// 创建用户的最大尝试次数。
    pub user_create_attempts: u32,
    /// 每次重试之间的等待（毫秒）。
    pub user_create_backoff_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 27017,
            user_create_attempts: 3,
            user_create_backoff_ms: 2000,
        }
    }
}

/// 单个可安装产品的定义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSpec {
    /// 产品标识（小写，同时作为默认实例名）。
    pub name: String,
    /// 默认监听端口。
    pub default_port: u16,
    #[serde(default)]
    /// 是否需要数据库。
    pub requires_database: bool,
    #[serde(default)]
    /// 是否提供可选的 Dashboard 插件。
    pub has_dashboard_option: bool,
    #[serde(default)]
    /// 产品描述。
    pub description: String,
}

impl ProductSpec {
    fn new(name: &str, default_port: u16, has_dashboard_option: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            default_port,
            requires_database: true,
            has_dashboard_option,
            description: description.to_string(),
        }
    }
}

/// 内置产品目录。
pub fn default_products() -> Vec<ProductSpec> {
    vec![
        ProductSpec::new(
            "plextickets",
            3000,
            true,
            "Ticket management system with optional dashboard",
        ),
        ProductSpec::new("plexstaff", 3001, false, "Staff management system"),
        ProductSpec::new("plexstatus", 3002, false, "Status page and monitoring"),
        ProductSpec::new("plexstore", 3003, false, "Store management system"),
        ProductSpec::new("plexforms", 3004, false, "Form builder and management"),
        ProductSpec::new("plexlinks", 3005, false, "Link management and shortener"),
        ProductSpec::new("plexpaste", 3006, false, "Pastebin service"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "install_root": "/srv/plex", "selftest": { "port_attempts": 3 } }"#;
        let cfg: InstallerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.install_root, PathBuf::from("/srv/plex"));
        assert_eq!(cfg.selftest.port_attempts, 3);
        assert_eq!(cfg.selftest.service_attempts, 10);
        assert_eq!(cfg.node_min_major, 20);
        assert_eq!(cfg.products.len(), 7);
    }

    #[test]
    fn product_lookup_ignores_case() {
        let cfg = InstallerConfig::default();
        let p = cfg.product("PlexTickets").unwrap();
        assert_eq!(p.default_port, 3000);
        assert!(p.has_dashboard_option);
        assert!(cfg.product("plexunknown").is_none());
    }
}
