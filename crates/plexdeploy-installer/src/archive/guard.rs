//! 归档条目路径安全校验（防路径穿越）。
//!
//! 规则：
//! - 条目名中的 `\` 一律视为分隔符
//! - 相对路径相对目标根解析；绝对路径按原样解析
//! - 按词法规整 `.`/`..` 后，结果必须位于目标根之内，否则返回 [`ArchiveError::PathTraversal`]
//! - 符号链接条目还需校验其指向（相对链接所在目录解析）
//! - 任何条目都不能经由归档内的符号链接条目落盘

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use plexdeploy_core::error::ArchiveError;

/// 校验条目并返回其在目标根下的绝对路径。
///
/// 参数：
/// - `root`：目标根目录（应为绝对路径）
/// - `entry`：归档内的条目名
///
/// 异常处理：
/// - 解析结果不在 `root` 之内：返回 `PathTraversal`
pub fn resolve_entry(root: &Path, entry: &str) -> Result<PathBuf, ArchiveError> {
    let root = normalize(root);
    let cleaned = entry.replace('\\', "/");
    let candidate = Path::new(&cleaned);
    let joined = if candidate.has_root() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = normalize(&joined);
    if resolved.starts_with(&root) {
        Ok(resolved)
    } else {
        Err(ArchiveError::PathTraversal {
            entry: entry.to_string(),
        })
    }
}

/// 校验符号链接条目的指向。
///
/// 参数：
/// - `root`：目标根目录
/// - `link_path`：链接自身解析后的路径（来自 [`resolve_entry`]）
/// - `target`：链接内容
/// - `entry`：条目名（用于错误信息）
/// - `links`：归档内全部符号链接条目解析后的路径
///
/// 异常处理：
/// - 指向位于 `root` 之外：返回 `PathTraversal`
/// - 指向途中经过其他符号链接条目（最后一段除外）：返回 `PathTraversal`，
///   词法结果与真实落点在这种情况下可能不一致
pub fn check_symlink_target(
    root: &Path,
    link_path: &Path,
    target: &str,
    entry: &str,
    links: &HashSet<PathBuf>,
) -> Result<(), ArchiveError> {
    let root = normalize(root);
    let cleaned = target.replace('\\', "/");
    let escape = || ArchiveError::PathTraversal {
        entry: format!("{entry} -> {cleaned}"),
    };
    let components: Vec<Component> = Path::new(&cleaned).components().collect();
    let mut cur = link_path.parent().unwrap_or(&root).to_path_buf();
    for (i, comp) in components.iter().enumerate() {
        match comp {
            Component::Prefix(p) => cur = PathBuf::from(p.as_os_str()),
            Component::RootDir => cur = PathBuf::from(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                cur.pop();
            }
            Component::Normal(name) => {
                cur.push(name);
                if i + 1 < components.len() && links.contains(&cur) {
                    return Err(escape());
                }
            }
        }
    }
    if cur.starts_with(&root) {
        Ok(())
    } else {
        Err(escape())
    }
}

/// 路径是否经过某个符号链接条目。
///
/// 参数：
/// - `path`：条目解析后的路径
/// - `links`：全部符号链接条目解析后的路径
/// - `inclusive`：为 `true` 时 `path` 本身与链接重合也算经过
pub fn passes_through_link(path: &Path, links: &HashSet<PathBuf>, inclusive: bool) -> bool {
    let mut cur = if inclusive { Some(path) } else { path.parent() };
    while let Some(p) = cur {
        if links.contains(p) {
            return true;
        }
        cur = p.parent();
    }
    false
}

/// 判断已落盘的路径（解析符号链接后）是否仍位于根目录之内。
pub fn is_contained(root: &Path, path: &Path) -> bool {
    match (root.canonicalize(), path.canonicalize()) {
        (Ok(root), Ok(real)) => real.starts_with(root),
        _ => false,
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}
