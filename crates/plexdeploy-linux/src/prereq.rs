//! 前置依赖检测与 Node.js 依赖安装。
//!
//! 说明：
//! - 本模块只负责检测 node/npm 是否可用以及执行 `npm install`，不负责安装系统软件包
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::process::run_with_timeout;

/// 前置依赖是否已安装。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrereqStatus {
    /// 已安装。
    Installed,
    /// 未安装。
    Missing,
}

/// 检测某个命令行工具是否在 PATH 中。
pub fn tool_status(tool: &str) -> PrereqStatus {
    if which::which(tool).is_ok() {
        PrereqStatus::Installed
    } else {
        PrereqStatus::Missing
    }
}

/// 解析 `node -v` 输出（如 `v20.11.1`）中的主版本号。
pub fn parse_node_major(version: &str) -> Option<u32> {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
}

/// 读取 Node.js 版本字符串。
///
/// 异常处理：
/// - node 不存在或执行失败返回错误
pub fn node_version(timeout: Duration) -> Result<String> {
    let out = run_with_timeout("node", &["-v"], None, timeout).context("执行 node -v 失败")?;
    if !out.success() {
        return Err(anyhow!("node -v 返回 {}: {}", out.status, out.stderr.trim()));
    }
    Ok(out.stdout.trim().to_string())
}

/// 在应用目录执行 `npm install`。
///
/// 参数：
/// - `app_dir`：包含 `package.json` 的目录
/// - `timeout`：超时时间（超时视为失败）
///
/// 异常处理：
/// - 缺少 `package.json`：返回错误
/// - npm 失败：返回错误并附带 stderr
pub fn npm_install(app_dir: &Path, timeout: Duration) -> Result<()> {
    if !app_dir.join("package.json").is_file() {
        return Err(anyhow!("未找到 package.json: {}", app_dir.display()));
    }
    info!("安装 npm 依赖: {}", app_dir.display());
    let out = run_with_timeout(
        "npm",
        &["install", "--unsafe-perm", "--loglevel=error"],
        Some(app_dir),
        timeout,
    )?;
    if !out.success() {
        return Err(anyhow!("npm install 失败: {}\n{}", out.status, out.stderr.trim()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_major_versions() {
        assert_eq!(parse_node_major("v20.11.1\n"), Some(20));
        assert_eq!(parse_node_major("18.0.0"), Some(18));
        assert_eq!(parse_node_major("garbage"), None);
    }

    #[cfg(unix)]
    #[test]
    fn tool_status_looks_up_path() {
        assert_eq!(tool_status("sh"), PrereqStatus::Installed);
        assert_eq!(tool_status("plexdeploy-no-such-tool"), PrereqStatus::Missing);
    }

    #[test]
    fn npm_install_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = npm_install(dir.path(), Duration::from_secs(1)).unwrap_err();
        assert!(err.to_string().contains("package.json"));
    }
}
