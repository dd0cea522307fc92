//! 协作式取消（SIGINT）。
//!
//! 说明：
//! - 信号处理函数只置位一个原子标志，不做其它事情
//! - 事务协调器在步骤之间检查该标志；子进程执行过程中不会被打断
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// 安装 SIGINT 处理函数（重复调用无副作用）。
///
/// 异常处理：
/// - 安装失败返回 IO 错误
#[cfg(unix)]
pub fn install_interrupt_handler() -> std::io::Result<()> {
    let handler = on_sigint as extern "C" fn(libc::c_int);
    let prev = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if prev == libc::SIG_ERR {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() -> std::io::Result<()> {
    Ok(())
}

/// 是否收到过中断请求。
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// 清除中断标志（事务开始前调用）。
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// 手动置位中断标志。
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}
