//! 实例状态落盘模型（`<state_dir>/<instance>.json`）。
//!
//! 目的：
//! - 记录“本次安装做过哪些系统修改”（即安装完成时的 [`InstallationContext`]），
//!   以便卸载时按记录精准回滚（服务/站点/证书/目录/防火墙端口）
//! - 记录归档摘要与配置文件位置，便于排障与再次自检
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::context::InstallationContext;

/// 实例状态（序列化为 JSON 存储到状态目录）。
///
/// 字段说明：
/// - `state_id`：状态记录 ID（区分同名实例的多次安装）
/// - `installed_at`：安装完成时间（UTC）
/// - `context`：安装完成时的上下文（含全部副作用标记）
/// - `archive_sha256`：安装所用归档的 SHA-256（十六进制）
/// - `config_file`：检测到的应用配置文件
/// - `addons`：安装时一并安装的插件名
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceState {
    pub state_id: Uuid,
    pub installed_at: OffsetDateTime,
    pub context: InstallationContext,
    #[serde(default)]
    pub archive_sha256: Option<String>,
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    #[serde(default)]
    pub addons: Vec<String>,
}

impl InstanceState {
    /// 创建一份新的实例状态。
    ///
    /// 返回值：
    /// - `state_id` 为随机 UUID，`installed_at` 为当前 UTC 时间。
    pub fn new(context: InstallationContext) -> Self {
        Self {
            state_id: Uuid::new_v4(),
            installed_at: OffsetDateTime::now_utc(),
            context,
            archive_sha256: None,
            config_file: None,
            addons: Vec::new(),
        }
    }

    /// 写入状态文件（父目录不存在时自动创建）。
    ///
    /// 异常处理：
    /// - 序列化失败或写文件失败会返回错误
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(self).context("序列化实例状态失败")?;
        std::fs::write(path, bytes)
            .with_context(|| format!("写入状态文件失败: {}", path.display()))?;
        Ok(())
    }

    /// 读取状态文件。
    ///
    /// 异常处理：
    /// - 文件不存在/不可读或 JSON 解析失败返回错误
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("读取状态文件失败: {}", path.display()))?;
        let state = serde_json::from_slice(&bytes)
            .with_context(|| format!("解析状态文件失败: {}", path.display()))?;
        Ok(state)
    }
}
