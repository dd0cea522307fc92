//! Linux 平台能力封装（systemd、nginx、certbot、防火墙、MongoDB、网络探测等）。
//!
//! 目标：
//! - 将宿主系统操作集中封装，避免上层事务逻辑直接拼接命令行
//! - 统一错误处理风格（以 `anyhow::Result` 形式向上返回，并附带 stdout/stderr）
//! - 所有外部命令都带显式超时
//!
//! 权限要求：
//! - 写入 /etc、管理服务/防火墙等操作通常需要 root 权限
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod database;
pub mod elevation;
pub mod firewall;
pub mod lock;
pub mod nginx;
pub mod permissions;
pub mod prereq;
pub mod probe;
pub mod process;
pub mod service;
pub mod signal;
pub mod tls;
