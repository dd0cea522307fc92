//! 类型化错误定义。
//!
//! 说明：
//! - 归档层错误（[`ArchiveError`]）需要被调用方区分处理：
//!   损坏归档提示重新下载；路径穿越视为恶意输入直接中止
//! - 宿主集成层统一使用 `anyhow::Result`，不在此处定义
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::PathBuf;

use thiserror::Error;

/// 归档解压与结构规整过程中的错误。
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// 不支持的归档格式（按扩展名判断，在任何解压动作之前返回）。
    #[error("不支持的归档格式: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// 归档文件不存在或不可读。
    #[error("归档文件不存在或不可读: {}", path.display())]
    ArchiveNotFound { path: PathBuf },

    /// 归档损坏或被截断。
    #[error("归档损坏或不完整: {} ({reason})", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    /// 条目会写到目标目录之外。
    #[error("检测到路径穿越条目: {entry}")]
    PathTraversal { entry: String },

    /// 需要的外部解压工具不存在。
    #[error("未找到解压工具 {tool}，请先安装（例如 apt install {tool}）")]
    ToolMissing { tool: String },

    /// 外部解压工具执行失败（非归档损坏类错误）。
    #[error("解压工具 {tool} 执行失败: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// 解压后没有产生任何新条目。
    #[error("归档中没有解压出任何文件")]
    NoFilesExtracted,

    /// 无法从归档文件名推导出目录名。
    #[error("无法从归档文件名推导目录名: {archive}")]
    AmbiguousName { archive: String },

    /// 推导出的目录名与已存在且无关的目录冲突。
    #[error("目录 '{name}' 已存在，请先移除或更换归档文件名")]
    NameCollision { name: String },

    /// 其它 IO 错误（附带上下文）。
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    /// 构造带上下文的 IO 错误。
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// 是否应视为恶意输入（不建议重试）。
    pub fn is_hostile(&self) -> bool {
        matches!(self, Self::PathTraversal { .. })
    }
}

/// 目录布局相关错误。
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("实例名非法: '{0}'（仅允许字母、数字、- 和 _）")]
    InvalidInstanceName(String),
}
