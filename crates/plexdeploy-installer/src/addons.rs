//! 插件管理：安装、列出、删除与配置校验。
//!
//! 说明：
//! - 插件安装与产品安装使用同一套解压/规整约定，目标为实例的 `addons/` 共享目录
//! - 插件的生命周期独立于所属实例的安装事务
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use plexdeploy_core::addon::{find_addon_config, list_addons, AddonRecord};
use plexdeploy_core::paths::Layout;
use plexdeploy_core::state::InstanceState;
use tracing::{info, warn};

use crate::host::Provisioner;
use crate::normalize;

/// 插件安装结果。
#[derive(Debug, Clone)]
pub struct AddonInstall {
    pub record: AddonRecord,
    pub repackaged: bool,
    pub warnings: Vec<String>,
}

/// 配置文件校验结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCheck {
    Valid { path: PathBuf },
    Invalid { path: PathBuf, message: String },
    Missing,
}

/// 插件管理器（绑定到单个实例）。
pub struct AddonManager<'a> {
    layout: &'a Layout,
    instance: String,
}

impl<'a> AddonManager<'a> {
    /// 创建管理器。
    ///
    /// 异常处理：
    /// - 实例目录不存在：返回错误
    pub fn open(layout: &'a Layout, instance: &str) -> Result<Self> {
        let dir = layout.instance_dir(instance);
        if !dir.is_dir() {
            return Err(anyhow!("实例不存在: {instance}（{}）", dir.display()));
        }
        Ok(Self {
            layout,
            instance: instance.to_string(),
        })
    }

    pub fn addons_dir(&self) -> PathBuf {
        self.layout.addons_dir(&self.instance)
    }

    /// 从归档安装插件。
    ///
    /// 异常处理：
    /// - 归档层错误（含 `NameCollision`）原样包装返回；失败时新增条目已被清理
    pub fn install(
        &self,
        archive: &Path,
        timeout: Duration,
        provisioner: &dyn Provisioner,
    ) -> Result<AddonInstall> {
        let extracted = normalize::extract_and_normalize(archive, &self.addons_dir(), timeout)?;
        let mut warnings = extracted.warnings.clone();

        let perms = provisioner.apply_permissions(&extracted.folder);
        if let Some(hint) = perms.hint(&extracted.folder) {
            warnings.push(hint);
        }

        let record = AddonRecord::from_dir(&extracted.folder);
        if record.config_path.is_none() {
            warnings.push(format!("插件 '{}' 未包含 config.yml/config.yaml", record.name));
        }
        self.update_state(|addons| {
            if !addons.contains(&record.name) {
                addons.push(record.name.clone());
            }
        });
        info!("插件已安装: {} -> {}", record.name, record.path.display());
        Ok(AddonInstall {
            record,
            repackaged: extracted.repackaged,
            warnings,
        })
    }

    pub fn list(&self) -> Result<Vec<AddonRecord>> {
        list_addons(&self.addons_dir())
    }

    /// 删除插件目录。
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.addon_path(name)?;
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("删除插件失败: {}", path.display()))?;
        self.update_state(|addons| addons.retain(|a| a != name));
        info!("插件已删除: {}", name);
        Ok(())
    }

    /// 校验插件的 YAML 配置。
    pub fn check_config(&self, name: &str) -> Result<ConfigCheck> {
        let path = self.addon_path(name)?;
        let Some(config) = find_addon_config(&path) else {
            return Ok(ConfigCheck::Missing);
        };
        Ok(match validate_yaml(&config)? {
            None => ConfigCheck::Valid { path: config },
            Some(message) => ConfigCheck::Invalid {
                path: config,
                message,
            },
        })
    }

    fn addon_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(anyhow!("非法插件名: {name}"));
        }
        let path = self.addons_dir().join(name);
        if !path.is_dir() {
            return Err(anyhow!("插件不存在: {name}"));
        }
        Ok(path)
    }

    /// 同步实例状态记录中的插件列表（状态文件不存在时跳过）。
    fn update_state(&self, edit: impl FnOnce(&mut Vec<String>)) {
        let path = self.layout.state_file(&self.instance);
        if !path.is_file() {
            return;
        }
        let result = InstanceState::load(&path).and_then(|mut state| {
            edit(&mut state.addons);
            state.persist(&path)
        });
        if let Err(e) = result {
            warn!("更新实例状态失败: {:#}", e);
        }
    }
}

/// 校验 YAML 语法。
///
/// 返回值：
/// - `None`：合法
/// - `Some(msg)`：不合法，消息中带行列号（若可得）
///
/// 异常处理：
/// - 文件读取失败返回错误
pub fn validate_yaml(path: &Path) -> Result<Option<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置失败: {}", path.display()))?;
    match serde_yaml::from_str::<serde_yaml::Value>(&text) {
        Ok(_) => Ok(None),
        Err(e) => Ok(Some(match e.location() {
            Some(loc) => format!("第 {} 行第 {} 列: {}", loc.line(), loc.column(), e),
            None => e.to_string(),
        })),
    }
}
