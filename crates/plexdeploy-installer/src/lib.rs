//! PlexDeploy 安装器库。
//!
//! 功能：
//! - 归档安全解压（zip/rar）与目录结构规整
//! - 安装事务编排（步骤顺序、失败/取消回滚、自检）
//! - 已安装实例的管理（卸载、插件、独立自检、环境诊断）
//!
//! 约束：
//! - 宿主系统操作全部经由 [`host::Provisioner`] / [`host::HealthProbe`]，便于测试注入
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod addons;
pub mod archive;
pub mod discovery;
pub mod host;
pub mod manage;
pub mod normalize;
pub mod rollback;
pub mod selftest;
pub mod transaction;
