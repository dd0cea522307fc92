//! 统一路径与目录约定。
//!
//! 目标：
//! - 将实例目录、服务单元、站点配置、状态记录等落盘路径集中管理
//! - 所有路径都从 [`InstallerConfig`] 派生，测试可注入临时目录
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::config::InstallerConfig;
use crate::error::LayoutError;

/// 服务单元名前缀。
///
/// 示例：
/// - 实例 `plextickets` 对应 `plex-plextickets.service`
pub const SERVICE_PREFIX: &str = "plex-";

/// 实例目录下的插件子目录名。
pub const ADDONS_DIR: &str = "addons";

/// 安装根目录下保留的备份目录名（不视为实例）。
pub const BACKUPS_DIR: &str = "backups";

/// 502 错误页文件名。
pub const ERROR_PAGE: &str = "502.html";

/// 目录布局：从配置派生的各类落盘路径。
#[derive(Debug, Clone)]
pub struct Layout {
    install_root: PathBuf,
    nginx_available: PathBuf,
    nginx_enabled: PathBuf,
    systemd_unit_dir: PathBuf,
    letsencrypt_live: PathBuf,
    state_dir: PathBuf,
}

impl Layout {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            install_root: config.install_root.clone(),
            nginx_available: config.nginx_available.clone(),
            nginx_enabled: config.nginx_enabled.clone(),
            systemd_unit_dir: config.systemd_unit_dir.clone(),
            letsencrypt_live: config.letsencrypt_live.clone(),
            state_dir: config.state_dir.clone(),
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// 实例目录：`<install_root>/<instance>`。
    pub fn instance_dir(&self, instance: &str) -> PathBuf {
        self.install_root.join(instance)
    }

    /// 实例插件目录：`<install_root>/<instance>/addons`。
    pub fn addons_dir(&self, instance: &str) -> PathBuf {
        self.instance_dir(instance).join(ADDONS_DIR)
    }

    /// 实例对应的 systemd 单元文件。
    pub fn unit_file(&self, instance: &str) -> PathBuf {
        self.systemd_unit_dir
            .join(format!("{}.service", service_name(instance)))
    }

    /// 域名对应的 nginx 站点配置（sites-available）。
    pub fn site_available(&self, domain: &str) -> PathBuf {
        self.nginx_available.join(format!("{domain}.conf"))
    }

    /// 域名对应的 nginx 启用链接（sites-enabled）。
    pub fn site_enabled(&self, domain: &str) -> PathBuf {
        self.nginx_enabled.join(format!("{domain}.conf"))
    }

    /// 域名对应的证书文件。
    pub fn certificate(&self, domain: &str) -> PathBuf {
        self.letsencrypt_live.join(domain).join("fullchain.pem")
    }

    /// 实例状态记录文件。
    pub fn state_file(&self, instance: &str) -> PathBuf {
        self.state_dir.join(format!("{instance}.json"))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// 列出安装根目录下的实例名（跳过隐藏目录与备份目录），按名称排序。
    ///
    /// 异常处理：
    /// - 安装根目录不存在时返回空列表
    /// - 读取目录失败返回错误
    pub fn list_instances(&self) -> Result<Vec<String>> {
        if !self.install_root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.install_root)
            .with_context(|| format!("读取目录失败: {}", self.install_root.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == BACKUPS_DIR {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

/// 实例对应的服务名（不含 `.service` 后缀）。
pub fn service_name(instance: &str) -> String {
    format!("{SERVICE_PREFIX}{instance}")
}

/// 校验实例名：仅允许字母、数字、`-`、`_`。
///
/// 异常处理：
/// - 空字符串、包含其它字符或为保留目录名时返回 [`LayoutError::InvalidInstanceName`]
pub fn validate_instance_name(name: &str) -> Result<(), LayoutError> {
    let valid = !name.is_empty()
        && name != BACKUPS_DIR
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LayoutError::InvalidInstanceName(name.to_string()))
    }
}

/// 确保目录存在（不存在则递归创建）。
///
/// 异常处理：
/// - 目录创建失败（权限、路径非法等）会返回错误。
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).with_context(|| format!("创建目录失败: {}", path.display()))?;
    Ok(())
}

/// 将用户输入的路径解析为实际路径。
///
/// 返回值：
/// - `raw` 为绝对路径：直接返回
/// - `raw` 为相对路径：返回 `base.join(raw)`
///
/// 异常处理：
/// - `raw` 为空字符串时返回错误，避免误用导致操作基准目录本身。
pub fn resolve_path(base: &Path, raw: &str) -> Result<PathBuf> {
    if raw.is_empty() {
        return Err(anyhow!("空路径"));
    }
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        Ok(p)
    } else {
        Ok(base.join(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_name_rules() {
        assert!(validate_instance_name("plextickets").is_ok());
        assert!(validate_instance_name("plex_tickets-2").is_ok());
        assert!(validate_instance_name("").is_err());
        assert!(validate_instance_name("../etc").is_err());
        assert!(validate_instance_name("a b").is_err());
        assert!(validate_instance_name("backups").is_err());
    }

    #[test]
    fn layout_paths_follow_config() {
        let cfg = InstallerConfig {
            install_root: PathBuf::from("/srv/plex"),
            systemd_unit_dir: PathBuf::from("/units"),
            ..InstallerConfig::default()
        };
        let layout = Layout::new(&cfg);
        assert_eq!(layout.instance_dir("a"), PathBuf::from("/srv/plex/a"));
        assert_eq!(layout.addons_dir("a"), PathBuf::from("/srv/plex/a/addons"));
        assert_eq!(layout.unit_file("a"), PathBuf::from("/units/plex-a.service"));
        assert_eq!(
            layout.site_enabled("x.example.com"),
            PathBuf::from("/etc/nginx/sites-enabled/x.example.com.conf")
        );
    }

    #[test]
    fn list_instances_skips_hidden_and_backups() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "a", ".incoming-1", "backups"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("stray.txt"), "x").unwrap();
        let cfg = InstallerConfig {
            install_root: dir.path().to_path_buf(),
            ..InstallerConfig::default()
        };
        let names = Layout::new(&cfg).list_instances().unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
