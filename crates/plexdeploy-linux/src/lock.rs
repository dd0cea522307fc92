//! 主机级互斥锁（基于 `flock` 的建议锁）。
//!
//! 说明：
//! - 进程存活期间持有，防止两个安装器实例同时操作同一安装目录/服务单元
//! - 进程退出（含异常退出）时由内核自动释放
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// 已持有的主机锁；drop 时释放。
#[derive(Debug)]
pub struct HostLock {
    file: File,
    path: PathBuf,
}

impl HostLock {
    /// 以非阻塞方式获取排他锁。
    ///
    /// 返回值：
    /// - 成功返回锁守卫
    ///
    /// 异常处理：
    /// - 锁已被其它进程持有：立即返回错误（包含持有者写入的 PID）
    /// - 锁文件无法创建：返回错误
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建锁目录失败: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("打开锁文件失败: {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    let holder = std::fs::read_to_string(path).unwrap_or_default();
                    return Err(anyhow!(
                        "另一个 plexdeploy 进程正在运行（PID {}），请等待其结束后重试",
                        holder.trim()
                    ));
                }
                return Err(err).with_context(|| format!("加锁失败: {}", path.display()));
            }
        }

        file.set_len(0)
            .with_context(|| format!("截断锁文件失败: {}", path.display()))?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let _ = self.file.set_len(0);
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}
