//! PAD 通用类型定义
//!
//! 此 crate 包含能力提供者 (capability) 与执行引擎 (executor) 之间共享的类型。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 数值型期望结果的比较容差
pub const NUMERIC_TOLERANCE: f64 = 1e-6;

/// 已解析的动作
///
/// 由 Design 经 Plan 展开得到，所有参数占位符均已替换为具体值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAction {
    /// 在所属 ResolvedRun 中的位置 (从 0 开始)
    pub step_index: usize,

    /// 动作 ID
    pub action_id: String,

    /// 展开路径 (例如 "P1/P2")
    pub plan_path: String,

    /// 能力名称
    pub capability: String,

    /// 操作动词
    pub verb: String,

    /// 目标 / 选择器
    #[serde(default)]
    pub target: String,

    /// 参数
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    /// 期望结果
    #[serde(default)]
    pub expected: Option<String>,

    /// 失败后是否继续执行后续步骤
    #[serde(default)]
    pub continue_on_failure: bool,

    /// 可选步骤: 失败不影响整体结果
    #[serde(default)]
    pub optional: bool,

    /// 单步超时 (毫秒)，未设置时使用运行配置的默认值
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// 步骤描述
    #[serde(default)]
    pub description: Option<String>,
}

impl ResolvedAction {
    /// 创建最小动作 (主要用于测试和能力提供者的直接调用)
    pub fn new(action_id: &str, capability: &str, verb: &str) -> Self {
        Self {
            step_index: 0,
            action_id: action_id.to_string(),
            plan_path: String::new(),
            capability: capability.to_string(),
            verb: verb.to_string(),
            target: String::new(),
            params: BTreeMap::new(),
            expected: None,
            continue_on_failure: false,
            optional: false,
            timeout_ms: None,
            description: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_expected(mut self, expected: &str) -> Self {
        self.expected = Some(expected.to_string());
        self
    }

    /// 获取参数值
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// 失败时是否中断所属运行
    pub fn halts_on_failure(&self) -> bool {
        !(self.continue_on_failure || self.optional)
    }

    /// 人类可读的步骤名称
    pub fn display_name(&self) -> String {
        match &self.description {
            Some(desc) if !desc.is_empty() => desc.clone(),
            _ => format!("{}.{} ({})", self.capability, self.verb, self.action_id),
        }
    }
}

/// 能力提供者返回的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// 执行成功，输出交由执行器与期望值比较
    Passed { output: Option<String> },

    /// 提供者自行判定的断言失败 (有输出但与期望不符)
    Failed { output: Option<String>, reason: String },
}

impl Outcome {
    pub fn passed(output: impl Into<String>) -> Self {
        Outcome::Passed {
            output: Some(output.into()),
        }
    }

    /// 无输出的成功结果
    pub fn done() -> Self {
        Outcome::Passed { output: None }
    }

    pub fn failed(output: Option<String>, reason: impl Into<String>) -> Self {
        Outcome::Failed {
            output,
            reason: reason.into(),
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            Outcome::Passed { output } | Outcome::Failed { output, .. } => output.as_deref(),
        }
    }
}

/// 步骤状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepStatus {
    Passed,
    Failed,
    Errored,
    TimedOut,
    Skipped,
}

impl StepStatus {
    /// 所有状态 (按报告列顺序)
    pub const ALL: [StepStatus; 5] = [
        StepStatus::Passed,
        StepStatus::Failed,
        StepStatus::Errored,
        StepStatus::TimedOut,
        StepStatus::Skipped,
    ];

    /// Failed / Errored / TimedOut 视为失败
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::Errored | StepStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Passed => "Passed",
            StepStatus::Failed => "Failed",
            StepStatus::Errored => "Errored",
            StepStatus::TimedOut => "TimedOut",
            StepStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Design 的整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Passed,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Passed => "Passed",
            RunStatus::Failed => "Failed",
            RunStatus::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 布尔结果的文本形式 ("True" / "False")
pub fn bool_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// 比较期望值与实际输出
///
/// 两者都能解析为数字时按 [`NUMERIC_TOLERANCE`] 比较；两者都是布尔文本时忽略大小写；
/// 否则比较去除首尾空白后的字符串。
pub fn expectation_matches(expected: &str, actual: &str) -> bool {
    let expected = expected.trim();
    let actual = actual.trim();

    if let (Ok(e), Ok(a)) = (expected.parse::<f64>(), actual.parse::<f64>()) {
        if e.is_finite() && a.is_finite() {
            return (e - a).abs() < NUMERIC_TOLERANCE;
        }
    }

    match (parse_bool(expected), parse_bool(actual)) {
        (Some(e), Some(a)) => e == a,
        _ => expected == actual,
    }
}

/// 判断表格单元格中的期望值是否为空 ("", "nan", "none")
pub fn is_blank_cell(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("nan") || value.eq_ignore_ascii_case("none")
}
