//! PlexDeploy 核心库（与宿主系统无关）。
//!
//! 功能：
//! - 定义安装器配置（installer-config.json）与产品目录
//! - 定义单次安装事务的上下文（[`context::InstallationContext`]）
//! - 定义自检报告、插件（addon）记录与实例状态落盘模型
//! - 提供统一的目录布局约定与类型化错误
//!
//! 约束：
//! - 本库不执行任何子进程调用，也不修改宿主系统配置
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

pub mod addon;
pub mod config;
pub mod context;
pub mod error;
pub mod paths;
pub mod report;
pub mod state;
