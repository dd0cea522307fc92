//! nginx 反向代理站点管理。
//!
//! 说明：
//! - 站点文件按域名命名（`<domain>.conf`），启用通过 `sites-enabled` 下的符号链接完成
//! - 写入后先 `nginx -t` 再 reload；语法检查失败不会 reload
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::process::{run_checked, run_with_timeout};
use crate::service::{self, set_mode};

/// 生成站点配置文本。
///
/// 参数：
/// - `domain`：域名（`server_name`）
/// - `port`：本地应用端口
/// - `error_page_root`：502 页面所在目录
pub fn site_contents(domain: &str, port: u16, error_page_root: &Path) -> String {
    format!(
        r#"server {{
    listen 80;
    server_name {domain};

    location / {{
        proxy_pass http://localhost:{port};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection 'upgrade';
        proxy_set_header Host $host;
        proxy_cache_bypass $http_upgrade;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 120s;
        proxy_connect_timeout 120s;
    }}

    error_page 502 /502.html;
    location = /502.html {{
        root {root};
        internal;
    }}
}}
"#,
        root = error_page_root.display()
    )
}

/// 写入站点文件并创建启用链接（不 reload）。
///
/// 异常处理：
/// - 写文件或创建符号链接失败返回错误
pub fn write_site(available: &Path, enabled: &Path, contents: &str) -> Result<()> {
    for dir in [available.parent(), enabled.parent()].into_iter().flatten() {
        std::fs::create_dir_all(dir).with_context(|| format!("创建目录失败: {}", dir.display()))?;
    }
    std::fs::write(available, contents)
        .with_context(|| format!("写入站点配置失败: {}", available.display()))?;
    set_mode(available, 0o644)?;

    if enabled.symlink_metadata().is_ok() {
        std::fs::remove_file(enabled)
            .with_context(|| format!("删除旧启用链接失败: {}", enabled.display()))?;
    }
    symlink(available, enabled)?;
    Ok(())
}

/// 写入站点、启用、语法检查并 reload。
pub fn configure_site(
    available: &Path,
    enabled: &Path,
    contents: &str,
    timeout: Duration,
) -> Result<()> {
    write_site(available, enabled, contents)?;
    run_checked("nginx", &["-t"], timeout).context("nginx 配置语法检查未通过")?;
    service::reload("nginx", timeout)?;
    info!("nginx 站点已启用: {}", available.display());
    Ok(())
}

/// 删除站点文件与启用链接（不存在则跳过）。
pub fn remove_site(available: &Path, enabled: &Path) -> Result<()> {
    if enabled.symlink_metadata().is_ok() {
        std::fs::remove_file(enabled)
            .with_context(|| format!("删除启用链接失败: {}", enabled.display()))?;
    }
    if available.exists() {
        std::fs::remove_file(available)
            .with_context(|| format!("删除站点配置失败: {}", available.display()))?;
    }
    Ok(())
}

/// 站点是否处于启用状态（启用链接存在）。
pub fn is_site_enabled(enabled: &Path) -> bool {
    enabled.symlink_metadata().is_ok()
}

/// `nginx -t` 是否通过。
pub fn syntax_ok(timeout: Duration) -> bool {
    run_with_timeout("nginx", &["-t"], None, timeout)
        .map(|out| out.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .with_context(|| format!("创建启用链接失败: {}", link.display()))
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::fs::copy(target, link)
        .map(|_| ())
        .with_context(|| format!("复制站点配置失败: {}", link.display()))
}
