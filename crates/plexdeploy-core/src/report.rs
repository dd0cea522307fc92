//! 安装后自检报告模型。
//!
//! 聚合规则：
//! - 报告中存在任一 `fail` 条目，整体即视为“不健康”
//! - 仅含 `pass`/`warn` 时视为健康（含 `warn` 时为“健康但有警告”）
//!
//! 作者：PlexDeploy 项目组
//! 创建时间：2026-10-19
//! 修改时间：2026-10-19

use std::fmt;

use serde::{Deserialize, Serialize};

/// 单项检查的三态结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// 单项检查结果。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfTestResult {
    /// 检查项名称（如 `service_active`）。
    pub name: String,
    pub status: CheckStatus,
    /// 人类可读的结果说明。
    pub detail: String,
    #[serde(default)]
    /// 修复建议（可选）。
    pub hint: Option<String>,
}

impl SelfTestResult {
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            detail: detail.into(),
            hint: None,
        }
    }

    pub fn warn(name: &str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }
}

/// 整体健康度。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    HealthyWithWarnings,
    Unhealthy,
}

/// 有序的自检结果列表。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfTestReport {
    pub results: Vec<SelfTestResult>,
}

impl SelfTestReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: SelfTestResult) {
        self.results.push(result);
    }

    /// 整体是否健康：当且仅当不存在 `fail` 条目。
    pub fn is_healthy(&self) -> bool {
        !self.results.iter().any(|r| r.status == CheckStatus::Fail)
    }

    pub fn health(&self) -> Health {
        if !self.is_healthy() {
            Health::Unhealthy
        } else if self.results.iter().any(|r| r.status == CheckStatus::Warn) {
            Health::HealthyWithWarnings
        } else {
            Health::Healthy
        }
    }

    /// 按状态统计条目数。
    pub fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// 按名称查找检查项。
    pub fn get(&self, name: &str) -> Option<&SelfTestResult> {
        self.results.iter().find(|r| r.name == name)
    }
}
