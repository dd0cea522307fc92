//! 插件（addon）记录。
//!
//! 约定：
//! - 插件位于实例目录的 `addons/` 下，每个插件一个目录
//! - 配置文件为插件目录下的 `config.yml` 或 `config.yaml`（按此优先级）

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 插件配置文件候选名（按优先级）。
pub const ADDON_CONFIG_NAMES: [&str; 2] = ["config.yml", "config.yaml"];

/// 已安装插件的记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonRecord {
    /// 插件目录名。
    pub name: String,
    /// 插件目录完整路径。
    pub path: PathBuf,
    /// 配置文件路径（不存在则为 `None`）。
    pub config_path: Option<PathBuf>,
}

impl AddonRecord {
    /// 从插件目录构造记录。
    pub fn from_dir(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            config_path: find_addon_config(path),
        }
    }
}

/// 查找插件配置文件。
pub fn find_addon_config(addon_dir: &Path) -> Option<PathBuf> {
    ADDON_CONFIG_NAMES
        .iter()
        .map(|n| addon_dir.join(n))
        .find(|p| p.is_file())
}

/// 列出 `addons_dir` 下的全部插件，按名称排序。
///
/// 异常处理：
/// - 目录不存在时返回空列表
/// - 读取目录失败返回错误
pub fn list_addons(addons_dir: &Path) -> Result<Vec<AddonRecord>> {
    if !addons_dir.exists() {
        return Ok(Vec::new());
    }
    let mut records = Vec::new();
    for entry in std::fs::read_dir(addons_dir)
        .with_context(|| format!("读取插件目录失败: {}", addons_dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            records.push(AddonRecord::from_dir(&entry.path()));
        }
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_addons_with_config_detection() {
        let dir = tempfile::tempdir().unwrap();
        let addons = dir.path().join("addons");
        std::fs::create_dir_all(addons.join("Zeta")).unwrap();
        std::fs::create_dir_all(addons.join("Alpha")).unwrap();
        std::fs::write(addons.join("Alpha").join("config.yaml"), "a: 1").unwrap();
        std::fs::write(addons.join("loose.txt"), "x").unwrap();

        let records = list_addons(&addons).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Alpha");
        assert_eq!(
            records[0].config_path.as_deref(),
            Some(addons.join("Alpha").join("config.yaml").as_path())
        );
        assert_eq!(records[1].name, "Zeta");
        assert!(records[1].config_path.is_none());
    }

    #[test]
    fn missing_addons_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_addons(&dir.path().join("nope")).unwrap().is_empty());
    }
}
