//! 归档搜索与实例命名。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use plexdeploy_core::paths::Layout;
use rand::Rng;
use tracing::debug;
use walkdir::WalkDir;

use crate::archive;

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// 在搜索目录中查找文件名包含 `keyword`（不区分大小写）的 zip/rar 归档。
///
/// 参数：
/// - `dirs`：搜索目录（不存在的目录跳过）
/// - `max_depth`：最大递归深度
/// - `keyword`：产品名等关键字
///
/// 返回值：
/// - 去重（按真实路径）并排序后的归档列表
pub fn find_archives(dirs: &[PathBuf], max_depth: usize, keyword: &str) -> Vec<PathBuf> {
    let keyword = keyword.to_ascii_lowercase();
    let mut found = BTreeSet::new();
    for dir in dirs.iter().filter(|d| d.is_dir()) {
        for entry in WalkDir::new(dir)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !archive::is_supported(entry.path()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
            if name.contains(&keyword) {
                let real = entry
                    .path()
                    .canonicalize()
                    .unwrap_or_else(|_| entry.path().to_path_buf());
                found.insert(real);
            }
        }
    }
    debug!("归档搜索 '{}': {} 个结果", keyword, found.len());
    found.into_iter().collect()
}

/// 4 位随机后缀（小写字母与数字）。
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// 为产品建议一个未被占用的实例名。
///
/// 规则：
/// - 默认实例目录不存在时使用产品名本身
/// - 否则使用 `<product>-<4 位随机后缀>`，直到目录与状态记录都未被占用
pub fn suggest_instance_name(layout: &Layout, product: &str) -> String {
    if !is_taken(layout, product) {
        return product.to_string();
    }
    loop {
        let candidate = format!("{product}-{}", random_suffix());
        if !is_taken(layout, &candidate) {
            return candidate;
        }
    }
}

/// 实例名是否已被占用（安装目录或状态记录存在）。
pub fn is_taken(layout: &Layout, instance: &str) -> bool {
    exists(&layout.instance_dir(instance)) || exists(&layout.state_file(instance))
}

fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
