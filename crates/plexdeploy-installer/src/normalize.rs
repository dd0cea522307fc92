//! 解压结果规整：把任意打包方式的归档落成“唯一一个规范目录”。
//!
//! 规则：
//! - 以目标目录解压前后的顶层条目差集（delta）为分类依据，而不是暂存目录的全部内容，
//!   因此可以直接解压到共享目录（如实例的 `addons/`）
//! - delta 恰为一个目录：视为正确打包，目录名即产品/插件名，不做任何整理
//! - 其它情况（散落文件、多个顶层条目、单个文件）：按归档文件名推导目录名，
//!   把 delta 中的全部条目移入该目录，并输出警告
//! - 推导目录名与 delta 之外的已有目录重名：返回 `NameCollision`，不会合并进无关目录
//! - 任意失败都会尽力删除 delta 后再返回错误
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::collections::{BTreeSet, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use plexdeploy_core::error::ArchiveError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::archive::{self, ArchiveFormat};

/// 推导目录名时去掉的后缀（按顺序各尝试一次，不区分大小写）。
pub const STRIPPED_SUFFIXES: [&str; 5] = ["-main", "-master", "-addon", "-v1", "-v2"];

const STAGING_PREFIX: &str = ".plexdeploy-extract-";
const APP_ROOT_MAX_DEPTH: usize = 3;

/// 规整成功后的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    /// 规范目录名（即产品/插件名）。
    pub name: String,
    /// 规范目录完整路径。
    pub folder: PathBuf,
    /// 是否经过重新整理（非单目录打包）。
    pub repackaged: bool,
    /// 面向用户的警告。
    pub warnings: Vec<String>,
}

/// 解压归档到 `destination` 并规整为唯一的规范目录。
///
/// 参数：
/// - `archive`：归档文件
/// - `destination`：目标目录（不存在会创建；失败时若由本函数创建则一并删除）
/// - `timeout`：外部解压工具超时
///
/// 返回值：
/// - 规范目录名与路径
///
/// 异常处理：
/// - 归档层错误（格式、损坏、穿越）原样返回
/// - `NoFilesExtracted` / `AmbiguousName` / `NameCollision`
pub fn extract_and_normalize(
    archive: &Path,
    destination: &Path,
    timeout: Duration,
) -> Result<ExtractionOutcome, ArchiveError> {
    ArchiveFormat::detect(archive)?;
    if !archive.is_file() {
        return Err(ArchiveError::ArchiveNotFound {
            path: archive.to_path_buf(),
        });
    }

    let created_destination = !destination.exists();
    if created_destination {
        std::fs::create_dir_all(destination).map_err(|e| {
            ArchiveError::io(format!("创建目标目录失败: {}", destination.display()), e)
        })?;
    }

    let before = match snapshot(destination) {
        Ok(s) => s,
        Err(e) => {
            remove_if_created(destination, created_destination);
            return Err(e);
        }
    };

    let result = extract_move_classify(archive, destination, &before, timeout);
    if let Err(e) = &result {
        debug!("规整失败，清理新增条目: {}", e);
        cleanup_delta(destination, &before);
        remove_if_created(destination, created_destination);
    }
    result
}

fn extract_move_classify(
    archive: &Path,
    destination: &Path,
    before: &BTreeSet<OsString>,
    timeout: Duration,
) -> Result<ExtractionOutcome, ArchiveError> {
    let staging = archive::extract_to_staging(archive, destination, timeout)?;

    let mut items = Vec::new();
    for entry in read_dir(staging.path())? {
        items.push(entry);
    }
    if items.is_empty() {
        return Err(ArchiveError::NoFilesExtracted);
    }
    // 先整体检查再移动，保证冲突时目标目录中的已有条目不被触碰
    for (_, name) in &items {
        if destination.join(name).symlink_metadata().is_ok() {
            return Err(ArchiveError::NameCollision {
                name: name.to_string_lossy().to_string(),
            });
        }
    }
    for (src, name) in &items {
        let dst = destination.join(name);
        std::fs::rename(src, &dst)
            .map_err(|e| ArchiveError::io(format!("移动条目失败: {}", dst.display()), e))?;
    }
    drop(staging);

    let after = snapshot(destination)?;
    let delta: Vec<OsString> = after.difference(before).cloned().collect();
    classify(archive, destination, &delta)
}

/// 对 delta 分类并在需要时整理到推导目录。
fn classify(
    archive: &Path,
    destination: &Path,
    delta: &[OsString],
) -> Result<ExtractionOutcome, ArchiveError> {
    if delta.is_empty() {
        return Err(ArchiveError::NoFilesExtracted);
    }
    // 只有单个目录原样保留；单个文件仍会整理到推导目录（待产品方确认是否保留该差异）
    if let [only] = delta {
        let path = destination.join(only);
        let is_dir = path
            .symlink_metadata()
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false);
        if is_dir {
            return Ok(ExtractionOutcome {
                name: only.to_string_lossy().to_string(),
                folder: path,
                repackaged: false,
                warnings: Vec::new(),
            });
        }
    }

    let derived = derive_name(archive)?;
    let wrapper = destination.join(&derived);
    let derived_os = OsString::from(&derived);
    let in_delta = delta.contains(&derived_os);
    if wrapper.symlink_metadata().is_ok() && !in_delta {
        return Err(ArchiveError::NameCollision { name: derived });
    }

    let mut moves: Vec<(PathBuf, OsString)> = delta
        .iter()
        .filter(|n| **n != derived_os)
        .map(|n| (destination.join(n), n.clone()))
        .collect();

    if in_delta && !wrapper.is_dir() {
        // 与推导目录同名的新增文件：先挪开，再随其它条目一起移入
        let parked = destination.join(format!(".plexdeploy-park-{}", Uuid::new_v4().simple()));
        std::fs::rename(&wrapper, &parked)
            .map_err(|e| ArchiveError::io(format!("移动条目失败: {}", wrapper.display()), e))?;
        moves.push((parked, derived_os.clone()));
    }
    if !wrapper.is_dir() {
        std::fs::create_dir(&wrapper)
            .map_err(|e| ArchiveError::io(format!("创建目录失败: {}", wrapper.display()), e))?;
    }

    for (src, name) in &moves {
        let dst = wrapper.join(name);
        if dst.symlink_metadata().is_ok() {
            return Err(ArchiveError::NameCollision {
                name: format!("{derived}/{}", name.to_string_lossy()),
            });
        }
        std::fs::rename(src, &dst)
            .map_err(|e| ArchiveError::io(format!("移动条目失败: {}", dst.display()), e))?;
    }

    let message = format!("归档未按单目录打包，已整理到 '{derived}/' 目录");
    warn!("{}", message);
    Ok(ExtractionOutcome {
        name: derived,
        folder: wrapper,
        repackaged: true,
        warnings: vec![message],
    })
}

/// 由归档文件名推导目录名。
///
/// 规则：
/// - 取去掉扩展名的文件名
/// - 依次尝试去掉 `-main`、`-master`、`-addon`、`-v1`、`-v2` 后缀（各一次，不区分大小写）
///
/// 异常处理：
/// - 结果为空、`.` 或 `..`：`AmbiguousName`
pub fn derive_name(archive: &Path) -> Result<String, ArchiveError> {
    let ambiguous = || ArchiveError::AmbiguousName {
        archive: archive.display().to_string(),
    };
    let mut name = archive
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(ambiguous)?;
    for suffix in STRIPPED_SUFFIXES {
        if name.to_ascii_lowercase().ends_with(suffix) {
            name.truncate(name.len() - suffix.len());
        }
    }
    let name = name.trim().to_string();
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(ambiguous());
    }
    Ok(name)
}

/// 在规范目录中定位应用根目录（含 `package.json` 的最近目录）。
///
/// 说明：
/// - 规范目录自身含 `package.json` 时直接返回
/// - 否则按广度优先在至多 3 层子目录中查找（跳过 `node_modules` 与隐藏目录，同层按名称排序）
/// - 都找不到时返回规范目录自身
pub fn locate_app_root(folder: &Path) -> PathBuf {
    let mut queue = VecDeque::from([(folder.to_path_buf(), 0usize)]);
    while let Some((dir, depth)) = queue.pop_front() {
        if dir.join("package.json").is_file() {
            return dir;
        }
        if depth >= APP_ROOT_MAX_DEPTH {
            continue;
        }
        let mut children: Vec<PathBuf> = match std::fs::read_dir(&dir) {
            Ok(rd) => rd
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
                .filter(|e| {
                    let n = e.file_name();
                    let n = n.to_string_lossy();
                    n != "node_modules" && !n.starts_with('.')
                })
                .map(|e| e.path())
                .collect(),
            Err(_) => continue,
        };
        children.sort();
        queue.extend(children.into_iter().map(|c| (c, depth + 1)));
    }
    folder.to_path_buf()
}

fn snapshot(dir: &Path) -> Result<BTreeSet<OsString>, ArchiveError> {
    let mut names = BTreeSet::new();
    for (_, name) in read_dir(dir)? {
        if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
            names.insert(name);
        }
    }
    Ok(names)
}

fn read_dir(dir: &Path) -> Result<Vec<(PathBuf, OsString)>, ArchiveError> {
    let rd = std::fs::read_dir(dir)
        .map_err(|e| ArchiveError::io(format!("读取目录失败: {}", dir.display()), e))?;
    let mut out = Vec::new();
    for entry in rd {
        let entry = entry.map_err(|e| ArchiveError::io(format!("读取目录失败: {}", dir.display()), e))?;
        out.push((entry.path(), entry.file_name()));
    }
    out.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(out)
}

/// 尽力删除 `destination` 中不属于 `before` 的条目。
fn cleanup_delta(destination: &Path, before: &BTreeSet<OsString>) {
    let Ok(entries) = read_dir(destination) else {
        return;
    };
    for (path, name) in entries {
        if before.contains(&name) {
            continue;
        }
        let res = match path.symlink_metadata() {
            Ok(m) if m.is_dir() => std::fs::remove_dir_all(&path),
            Ok(_) => std::fs::remove_file(&path),
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            warn!("清理失败: {} ({})", path.display(), e);
        }
    }
}

fn remove_if_created(destination: &Path, created: bool) {
    if created {
        let _ = std::fs::remove_dir(destination);
    }
}
