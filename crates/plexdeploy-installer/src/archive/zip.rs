//! zip 归档解压。
//!
//! 流程：
//! - 第一遍：枚举全部条目并逐一做路径校验（含符号链接指向），任何一条不通过则整体失败，此时尚未写入任何字节
//! - 经过归档内符号链接条目的路径一律拒绝，链接之间不能拼接出根目录以外的落点
//! - 第二遍：按计划写出目录与文件，符号链接最后创建

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use plexdeploy_core::error::ArchiveError;
use tracing::debug;
use ::zip::ZipArchive;

use super::guard::{check_symlink_target, passes_through_link, resolve_entry};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug)]
enum EntryKind {
    Dir,
    File { mode: Option<u32> },
    Symlink { target: String },
}

#[derive(Debug)]
struct PlannedEntry {
    index: usize,
    name: String,
    dest: PathBuf,
    kind: EntryKind,
}

/// 解压 zip 到 `dest`（`dest` 必须已存在）。
///
/// 返回值：
/// - 写出的条目数
///
/// 异常处理：
/// - 结构损坏、CRC 校验失败：`CorruptArchive`
/// - 路径穿越（含经由符号链接条目的穿越）：`PathTraversal`（在写入任何文件之前返回）
pub(crate) fn extract(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let corrupt = |reason: String| ArchiveError::CorruptArchive {
        path: archive.to_path_buf(),
        reason,
    };
    let file = File::open(archive).map_err(|_| ArchiveError::ArchiveNotFound {
        path: archive.to_path_buf(),
    })?;
    let mut zip = ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    let mut plan = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| corrupt(e.to_string()))?;
        let name = entry.name().to_string();
        let dest_path = resolve_entry(dest, &name)?;
        let mode = entry.unix_mode();
        let kind = if entry.is_dir() {
            EntryKind::Dir
        } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            entry
                .read_to_string(&mut target)
                .map_err(|e| corrupt(format!("读取符号链接 {name} 失败: {e}")))?;
            EntryKind::Symlink { target }
        } else {
            EntryKind::File { mode }
        };
        plan.push(PlannedEntry {
            index,
            name,
            dest: dest_path,
            kind,
        });
    }

    let links: HashSet<PathBuf> = plan
        .iter()
        .filter(|item| matches!(item.kind, EntryKind::Symlink { .. }))
        .map(|item| item.dest.clone())
        .collect();
    for item in &plan {
        let is_link = matches!(item.kind, EntryKind::Symlink { .. });
        if passes_through_link(&item.dest, &links, !is_link) {
            return Err(ArchiveError::PathTraversal {
                entry: item.name.clone(),
            });
        }
        if let EntryKind::Symlink { target } = &item.kind {
            check_symlink_target(dest, &item.dest, target, &item.name, &links)?;
        }
    }

    let (link_items, write_items): (Vec<&PlannedEntry>, Vec<&PlannedEntry>) =
        plan.iter().partition(|item| matches!(item.kind, EntryKind::Symlink { .. }));
    for item in write_items.into_iter().chain(link_items) {
        match &item.kind {
            EntryKind::Dir => {
                std::fs::create_dir_all(&item.dest).map_err(|e| {
                    ArchiveError::io(format!("创建目录失败: {}", item.dest.display()), e)
                })?;
            }
            EntryKind::File { mode } => {
                ensure_parent(&item.dest)?;
                let mut entry = zip.by_index(item.index).map_err(|e| corrupt(e.to_string()))?;
                let mut out = File::create(&item.dest).map_err(|e| {
                    ArchiveError::io(format!("创建文件失败: {}", item.dest.display()), e)
                })?;
                io::copy(&mut entry, &mut out).map_err(|e| match e.kind() {
                    io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof | io::ErrorKind::Other => {
                        corrupt(format!("{}: {e}", entry.name()))
                    }
                    _ => ArchiveError::io(format!("写入文件失败: {}", item.dest.display()), e),
                })?;
                apply_mode(&item.dest, *mode);
            }
            EntryKind::Symlink { target } => {
                ensure_parent(&item.dest)?;
                make_symlink(target, &item.dest)?;
            }
        }
    }
    debug!("zip 解压完成: {} 个条目", plan.len());
    Ok(plan.len())
}

fn ensure_parent(path: &Path) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ArchiveError::io(format!("创建目录失败: {}", parent.display()), e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        let perm = mode & 0o777;
        if perm != 0 {
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(perm | 0o600)) {
                debug!("设置文件权限失败，保留默认权限: {} ({})", path.display(), e);
            }
        }
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) {}

#[cfg(unix)]
fn make_symlink(target: &str, link: &Path) -> Result<(), ArchiveError> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| ArchiveError::io(format!("创建符号链接失败: {}", link.display()), e))
}

#[cfg(not(unix))]
fn make_symlink(_target: &str, link: &Path) -> Result<(), ArchiveError> {
    tracing::warn!("当前平台不支持符号链接，已跳过: {}", link.display());
    Ok(())
}
