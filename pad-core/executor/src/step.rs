//! 动作执行器
//!
//! 执行单个已解析动作: 查找能力处理器、施加超时、捕获错误与 panic，
//! 并把结果统一为 [`StepResult`]。

use chrono::{DateTime, Local};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use pad_capability::{CapabilityRegistry, Session};
use pad_common::{expectation_matches, Outcome, ResolvedAction, StepStatus};

/// 单个动作的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 在所属运行中的位置
    pub step_index: usize,

    pub action_id: String,

    /// 展开路径 (例如 "P1/P2")
    pub plan_path: String,

    /// 步骤描述
    pub description: String,

    pub capability: String,
    pub verb: String,
    pub target: String,

    /// 步骤状态
    pub status: StepStatus,

    /// 输出内容
    pub output: Option<String>,

    /// 期望结果
    pub expected: Option<String>,

    /// 错误信息
    pub error: Option<String>,

    /// 可选步骤
    pub optional: bool,

    /// 耗时（毫秒）
    pub duration_ms: u64,

    /// 完成时间
    pub timestamp: DateTime<Local>,
}

impl StepResult {
    fn new(action: &ResolvedAction, status: StepStatus) -> Self {
        Self {
            step_index: action.step_index,
            action_id: action.action_id.clone(),
            plan_path: action.plan_path.clone(),
            description: action.display_name(),
            capability: action.capability.clone(),
            verb: action.verb.clone(),
            target: action.target.clone(),
            status,
            output: None,
            expected: action.expected.clone(),
            error: None,
            optional: action.optional,
            duration_ms: 0,
            timestamp: Local::now(),
        }
    }

    /// 未执行的步骤
    pub fn skipped(action: &ResolvedAction, reason: &str) -> Self {
        let mut result = Self::new(action, StepStatus::Skipped);
        result.error = Some(reason.to_string());
        result
    }

    /// 执行前或执行中出错的步骤
    pub fn errored(action: &ResolvedAction, error: &str) -> Self {
        let mut result = Self::new(action, StepStatus::Errored);
        result.error = Some(error.to_string());
        result
    }

    /// 是否计入整体失败
    pub fn counts_as_failure(&self) -> bool {
        self.status.is_failure() && !self.optional
    }
}

/// 动作执行器
#[derive(Clone)]
pub struct ActionExecutor {
    registry: Arc<CapabilityRegistry>,
    default_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// 执行动作，超时取动作自身设置或默认值
    pub async fn run(&self, action: &ResolvedAction, session: &mut Session) -> StepResult {
        let limit = action
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);
        self.run_with_timeout(action, session, limit).await
    }

    /// 在指定超时内执行动作
    ///
    /// 超时后放弃等待 (丢弃 future)，不保证底层调用立即停止。
    pub async fn run_with_timeout(
        &self,
        action: &ResolvedAction,
        session: &mut Session,
        limit: Duration,
    ) -> StepResult {
        let start_time = Instant::now();
        debug!(
            design = %session.design_id(),
            action = %action.action_id,
            "执行动作 {}.{} (超时 {:?})", action.capability, action.verb, limit
        );

        let handler = match self.registry.resolve(&action.capability) {
            Ok(handler) => handler,
            Err(e) => return StepResult::errored(action, &e.to_string()),
        };

        let call = AssertUnwindSafe(handler.execute(action, session)).catch_unwind();
        let outcome = timeout(limit, call).await;

        let mut result = match outcome {
            Err(_) => {
                warn!(action = %action.action_id, "动作执行超时 ({:?})", limit);
                let mut result = StepResult::new(action, StepStatus::TimedOut);
                result.error = Some(format!("执行超时 ({}ms)", limit.as_millis()));
                result
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(action = %action.action_id, "能力处理器 panic: {}", message);
                StepResult::errored(action, &format!("能力处理器 panic: {}", message))
            }
            Ok(Ok(Err(e))) => StepResult::errored(action, &e.to_string()),
            Ok(Ok(Ok(outcome))) => Self::judge(action, outcome),
        };

        result.duration_ms = start_time.elapsed().as_millis() as u64;
        result.timestamp = Local::now();

        debug!(
            action = %action.action_id,
            "动作完成: {} ({}ms)", result.status, result.duration_ms
        );
        result
    }

    /// 把能力返回的结果与期望值比较
    fn judge(action: &ResolvedAction, outcome: Outcome) -> StepResult {
        match outcome {
            Outcome::Failed { output, reason } => {
                let mut result = StepResult::new(action, StepStatus::Failed);
                result.output = output;
                result.error = Some(reason);
                result
            }
            Outcome::Passed { output } => {
                let mismatch = match (&action.expected, &output) {
                    (None, _) => None,
                    (Some(expected), Some(actual)) if expectation_matches(expected, actual) => None,
                    (Some(expected), Some(actual)) => {
                        Some(format!("期望 '{}', 实际 '{}'", expected, actual))
                    }
                    (Some(expected), None) => Some(format!("期望 '{}', 但没有输出", expected)),
                };

                let status = if mismatch.is_some() {
                    StepStatus::Failed
                } else {
                    StepStatus::Passed
                };
                let mut result = StepResult::new(action, status);
                result.output = output;
                result.error = mismatch;
                result
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知 panic".to_string()
    }
}
