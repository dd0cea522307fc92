//! 带超时的子进程执行。
//!
//! 说明：
//! - 所有外部命令均为同步阻塞调用，超时视为失败（不自动重试）
//! - stdout/stderr 由独立线程读取，避免输出过多时管道写满导致死锁
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// 子进程执行结果。
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// 执行命令并等待结束，超过 `timeout` 则终止子进程并返回错误。
///
/// 参数：
/// - `program`：可执行文件名或路径
/// - `args`：参数列表（不包含程序名）
/// - `cwd`：工作目录（可选）
/// - `timeout`：最长等待时间
///
/// 异常处理：
/// - 启动失败：返回错误（通常是程序不存在或权限问题）
/// - 超时：终止子进程后返回错误
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!("执行命令: {} {}", program, args.join(" "));
    let mut child = cmd
        .spawn()
        .with_context(|| format!("启动命令失败: {program}"))?;

    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let start = Instant::now();
    let status = loop {
        match child
            .try_wait()
            .with_context(|| format!("等待命令失败: {program}"))?
        {
            Some(status) => break status,
            None => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(anyhow!("命令执行超时（{:?}）: {}", timeout, program));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    };

    Ok(CommandOutput {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    })
}

/// 执行命令，退出码非 0 时返回错误并附带 stdout/stderr 便于排障。
pub fn run_checked(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    let out = run_with_timeout(program, args, None, timeout)?;
    if out.success() {
        return Ok(out);
    }
    Err(anyhow!(
        "{} 执行失败: {}\n{}\n{}",
        program,
        out.status,
        out.stdout,
        out.stderr
    ))
}

fn spawn_reader<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_status() {
        let out = run_with_timeout("sh", &["-c", "echo hi; echo err >&2; exit 3"], None, Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.code(), Some(3));
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn times_out_long_running_command() {
        let err = run_with_timeout("sleep", &["5"], None, Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("超时"));
    }

    #[test]
    fn run_checked_reports_failure_output() {
        let err = run_checked("sh", &["-c", "echo boom >&2; exit 1"], Duration::from_secs(5))
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
