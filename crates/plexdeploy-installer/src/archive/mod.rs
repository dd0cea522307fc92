//! 归档识别与解压。
//!
//! 说明：
//! - 支持 zip（内置解压）与 rar（外部 `unrar`）
//! - 解压总是写入一个新建的临时暂存目录，失败时暂存目录随 [`TempDir`] 一并删除，
//!   不会污染最终目标
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod guard;
mod rar;
mod zip;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use plexdeploy_core::error::ArchiveError;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tracing::info;

/// 支持的归档格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Rar,
}

impl ArchiveFormat {
    /// 按扩展名识别格式（不区分大小写）。
    ///
    /// 异常处理：
    /// - 其它扩展名：`UnsupportedFormat`
    pub fn detect(path: &Path) -> Result<Self, ArchiveError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("zip") => Ok(Self::Zip),
            Some("rar") => Ok(Self::Rar),
            _ => Err(ArchiveError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// 是否为支持的归档扩展名。
pub fn is_supported(path: &Path) -> bool {
    ArchiveFormat::detect(path).is_ok()
}

/// 将归档解压到已存在的目录 `dest`。
///
/// 参数：
/// - `archive`：归档文件
/// - `dest`：目标目录（必须已存在，建议为新建的空目录）
/// - `timeout`：外部解压工具超时
///
/// 返回值：
/// - 写出的条目数
///
/// 异常处理：
/// - 先判断格式，再判断文件可读，之后才会调用任何解压逻辑
pub fn extract_into(archive: &Path, dest: &Path, timeout: Duration) -> Result<usize, ArchiveError> {
    let format = ArchiveFormat::detect(archive)?;
    ensure_readable(archive)?;
    info!("解压 {:?} 归档: {}", format, archive.display());
    match format {
        ArchiveFormat::Zip => zip::extract(archive, dest),
        ArchiveFormat::Rar => rar::extract(archive, dest, timeout),
    }
}

/// 在 `parent` 下新建暂存目录并解压。
///
/// 返回值：
/// - 暂存目录守卫（drop 时删除）
///
/// 异常处理：
/// - 任何失败都会在返回前删除暂存目录
pub fn extract_to_staging(
    archive: &Path,
    parent: &Path,
    timeout: Duration,
) -> Result<TempDir, ArchiveError> {
    let format = ArchiveFormat::detect(archive)?;
    ensure_readable(archive)?;
    let staging = tempfile::Builder::new()
        .prefix(".plexdeploy-extract-")
        .tempdir_in(parent)
        .map_err(|e| ArchiveError::io(format!("创建暂存目录失败: {}", parent.display()), e))?;
    match format {
        ArchiveFormat::Zip => zip::extract(archive, staging.path())?,
        ArchiveFormat::Rar => rar::extract(archive, staging.path(), timeout)?,
    };
    Ok(staging)
}

/// 计算归档文件的 SHA-256（十六进制小写）。
pub fn sha256_hex(path: &Path) -> Result<String, ArchiveError> {
    let mut file = File::open(path).map_err(|_| ArchiveError::ArchiveNotFound {
        path: path.to_path_buf(),
    })?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| ArchiveError::io(format!("读取归档失败: {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

fn ensure_readable(archive: &Path) -> Result<(), ArchiveError> {
    let not_found = || ArchiveError::ArchiveNotFound {
        path: archive.to_path_buf(),
    };
    if !archive.is_file() {
        return Err(not_found());
    }
    File::open(archive).map(|_| ()).map_err(|_| not_found())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_detection_ignores_case_and_rejects_others() {
        assert_eq!(ArchiveFormat::detect(Path::new("a/B.ZIP")).unwrap(), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::detect(Path::new("x.rar")).unwrap(), ArchiveFormat::Rar);
        for bad in ["x.tar.gz", "x.7z", "noext"] {
            assert!(matches!(
                ArchiveFormat::detect(Path::new(bad)),
                Err(ArchiveError::UnsupportedFormat { .. })
            ));
        }
    }

    #[test]
    fn unsupported_format_wins_over_missing_file() {
        let err = extract_into(Path::new("/nonexistent/x.tar"), Path::new("/tmp"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat { .. }));
        let err = extract_into(Path::new("/nonexistent/x.zip"), Path::new("/tmp"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ArchiveNotFound { .. }));
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.zip");
        std::fs::write(&p, b"abc").unwrap();
        assert_eq!(
            sha256_hex(&p).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
