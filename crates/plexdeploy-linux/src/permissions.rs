//! 目录树权限设置（目录 0755、文件 0644，root 运行时归属 root:root）。
//!
//! 说明：
//! - 不吞掉错误：每个失败的条目都会被记录到 [`PermissionOutcome`]，由调用方决定是否告警
//! - 符号链接本身不处理（不跟随）
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// 单个失败条目。
#[derive(Debug, Clone)]
pub struct PermissionFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 权限设置结果。
#[derive(Debug, Clone, Default)]
pub struct PermissionOutcome {
    /// 成功处理的条目数。
    pub updated: usize,
    /// 失败条目。
    pub failures: Vec<PermissionFailure>,
}

impl PermissionOutcome {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// 失败时给出修复建议。
    pub fn hint(&self, root: &Path) -> Option<String> {
        if self.is_ok() {
            return None;
        }
        Some(format!(
            "{count} 个条目权限设置失败，可手动执行: chown -R root:root {root} && find {root} -type d -exec chmod 755 {{}} + && find {root} -type f -exec chmod 644 {{}} +",
            count = self.failures.len(),
            root = root.display()
        ))
    }
}

/// 递归设置目录树权限。
///
/// 参数：
/// - `root`：目录树根
/// - `chown_root`：是否同时将归属改为 root:root（仅 root 运行时有效）
///
/// 返回值：
/// - 成功/失败统计（不会因单个条目失败而中止）
pub fn apply_tree_permissions(root: &Path, chown_root: bool) -> PermissionOutcome {
    let mut outcome = PermissionOutcome::default();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                outcome.failures.push(PermissionFailure {
                    path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let ft = entry.file_type();
        if ft.is_symlink() {
            continue;
        }
        let mode = if ft.is_dir() { 0o755 } else { 0o644 };
        match set_entry(entry.path(), mode, chown_root) {
            Ok(()) => outcome.updated += 1,
            Err(e) => outcome.failures.push(PermissionFailure {
                path: entry.path().to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }
    if !outcome.is_ok() {
        warn!("{} 个条目权限设置失败: {}", outcome.failures.len(), root.display());
    }
    outcome
}

#[cfg(unix)]
fn set_entry(path: &Path, mode: u32, chown_root: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    if chown_root {
        std::os::unix::fs::chown(path, Some(0), Some(0))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_entry(_path: &Path, _mode: u32, _chown_root: bool) -> std::io::Result<()> {
    Ok(())
}
