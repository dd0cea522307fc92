//! rar 归档解压（调用外部 `unrar`）。
//!
//! 说明：
//! - unrar 自身的路径穿越防护不可完全信任：解压完成后会遍历结果，
//!   删除任何解析到目标目录之外的条目并整体失败

use std::path::Path;
use std::time::Duration;

use plexdeploy_core::error::ArchiveError;
use plexdeploy_linux::process::run_with_timeout;
use tracing::{debug, error};
use walkdir::WalkDir;

use super::guard::is_contained;

const UNRAR: &str = "unrar";

/// 解压 rar 到 `dest`。
///
/// 返回值：
/// - 解压后 `dest` 下的条目数
///
/// 异常处理：
/// - 未安装 unrar：`ToolMissing`
/// - unrar 退出码 2/3（致命错误/CRC 错误）：`CorruptArchive`
/// - 其它非 0 退出码或超时：`ToolFailed`
/// - 解压结果越界：`PathTraversal`
pub(crate) fn extract(archive: &Path, dest: &Path, timeout: Duration) -> Result<usize, ArchiveError> {
    if which::which(UNRAR).is_err() {
        return Err(ArchiveError::ToolMissing {
            tool: UNRAR.to_string(),
        });
    }
    let archive_arg = archive.to_string_lossy();
    let dest_arg = format!("{}/", dest.display());
    let out = run_with_timeout(UNRAR, &["x", "-o+", "-y", &archive_arg, &dest_arg], None, timeout)
        .map_err(|e| ArchiveError::ToolFailed {
            tool: UNRAR.to_string(),
            detail: format!("{e:#}"),
        })?;
    match out.code() {
        Some(0) => {}
        Some(2) | Some(3) => {
            return Err(ArchiveError::CorruptArchive {
                path: archive.to_path_buf(),
                reason: out.stderr.trim().to_string(),
            })
        }
        _ => {
            return Err(ArchiveError::ToolFailed {
                tool: UNRAR.to_string(),
                detail: format!("{}: {}", out.status, out.stderr.trim()),
            })
        }
    }

    let count = sweep(dest)?;
    debug!("rar 解压完成: {} 个条目", count);
    Ok(count)
}

/// 遍历解压结果，删除越界条目。
///
/// 返回值：
/// - 合规条目数
///
/// 异常处理：
/// - 存在越界条目：删除后返回 `PathTraversal`（携带首个越界条目）
pub(crate) fn sweep(dest: &Path) -> Result<usize, ArchiveError> {
    let mut count = 0usize;
    let mut offending = Vec::new();
    for entry in WalkDir::new(dest).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            ArchiveError::io(
                format!("遍历解压目录失败: {}", dest.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walkdir loop")),
            )
        })?;
        let path = entry.path();
        // 悬空链接无法解析，同样视为越界
        if !is_contained(dest, path) {
            offending.push(path.to_path_buf());
        } else {
            count += 1;
        }
    }

    if let Some(first) = offending.first() {
        for path in &offending {
            error!("解压结果越界，已删除: {}", path.display());
            let _ = remove_any(path);
        }
        let entry = first
            .strip_prefix(dest)
            .unwrap_or(first)
            .display()
            .to_string();
        return Err(ArchiveError::PathTraversal { entry });
    }
    Ok(count)
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = std::fs::symlink_metadata(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
