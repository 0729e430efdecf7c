//! Plan 运行器
//!
//! 在同一个会话中按顺序执行一个 [`ResolvedRun`] 的所有步骤。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info};

use pad_capability::Session;
use pad_common::{RunStatus, StepStatus};

use crate::scenario::ResolvedRun;
use crate::step::{ActionExecutor, StepResult};

/// 单个 Design 的执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub design_id: String,

    pub description: Option<String>,

    /// 整体状态
    pub status: RunStatus,

    /// 期望的整体状态
    pub expected: Option<RunStatus>,

    /// 整体状态是否符合期望 (未声明期望时为空)
    pub expectation_met: Option<bool>,

    /// 步骤结果 (顺序与 ResolvedRun 一致)
    pub steps: Vec<StepResult>,

    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,

    /// 总耗时（毫秒）
    pub duration_ms: u64,
}

impl RunResult {
    /// 由步骤结果推导整体状态
    pub fn from_steps(
        run: &ResolvedRun,
        steps: Vec<StepResult>,
        started_at: DateTime<Local>,
        duration_ms: u64,
    ) -> Self {
        let status = if steps.iter().any(StepResult::counts_as_failure) {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };
        Self::assemble(run, status, steps, started_at, duration_ms)
    }

    /// 从未开始执行的 Design (例如超过整体运行时限)
    pub fn skipped(run: &ResolvedRun, reason: &str) -> Self {
        let steps = run
            .steps()
            .iter()
            .map(|action| StepResult::skipped(action, reason))
            .collect();
        Self::assemble(run, RunStatus::Skipped, steps, Local::now(), 0)
    }

    /// 未能返回结果的 Design: 第一步记为 Errored，其余 Skipped
    pub fn errored(run: &ResolvedRun, reason: &str) -> Self {
        let steps = run
            .steps()
            .iter()
            .enumerate()
            .map(|(index, action)| {
                if index == 0 {
                    StepResult::errored(action, reason)
                } else {
                    StepResult::skipped(action, reason)
                }
            })
            .collect();
        Self::assemble(run, RunStatus::Failed, steps, Local::now(), 0)
    }

    fn assemble(
        run: &ResolvedRun,
        status: RunStatus,
        steps: Vec<StepResult>,
        started_at: DateTime<Local>,
        duration_ms: u64,
    ) -> Self {
        let expected = run.expected();
        Self {
            design_id: run.design_id().to_string(),
            description: run.description().map(str::to_string),
            status,
            expected,
            expectation_met: expected.map(|e| e == status),
            steps,
            started_at,
            finished_at: Local::now(),
            duration_ms,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// 指定状态的步骤数
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

/// Plan 运行器
#[derive(Clone)]
pub struct PlanRunner {
    executor: ActionExecutor,
}

impl PlanRunner {
    pub fn new(executor: ActionExecutor) -> Self {
        Self { executor }
    }

    /// 在新会话中执行，结束后清理会话
    pub async fn run(&self, run: &ResolvedRun) -> RunResult {
        let mut session = Session::new(run.design_id());
        let result = self.run_in_session(run, &mut session).await;
        self.executor.registry().reset_session(&mut session).await;
        result
    }

    /// 在给定会话中按顺序执行所有步骤
    ///
    /// 失败 (Failed / Errored / TimedOut) 的步骤会中断后续步骤，
    /// 除非该步骤标记为 continue_on_failure 或 optional。
    pub async fn run_in_session(&self, run: &ResolvedRun, session: &mut Session) -> RunResult {
        info!(design = %run.design_id(), "开始执行 Design ({} 个步骤)", run.len());

        let started_at = Local::now();
        let start_time = Instant::now();
        let mut steps = Vec::with_capacity(run.len());
        let mut halted_by: Option<String> = None;

        for action in run.steps() {
            if let Some(failed) = &halted_by {
                steps.push(StepResult::skipped(
                    action,
                    &format!("前序步骤 {} 失败", failed),
                ));
                continue;
            }

            debug!(
                design = %run.design_id(),
                "执行步骤 {}/{}: {}",
                action.step_index + 1,
                run.len(),
                action.display_name()
            );

            let result = self.executor.run(action, session).await;

            if result.status.is_failure() {
                error!(
                    design = %run.design_id(),
                    action = %action.action_id,
                    "步骤 {} 失败: {} {}",
                    action.step_index + 1,
                    result.status,
                    result.error.as_deref().unwrap_or("")
                );
                if action.halts_on_failure() {
                    halted_by = Some(action.action_id.clone());
                }
            }

            steps.push(result);
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let result = RunResult::from_steps(run, steps, started_at, duration_ms);

        info!(
            design = %run.design_id(),
            "Design 执行完成: {} - {}/{} 步骤成功",
            result.status,
            result.count(StepStatus::Passed),
            result.steps.len()
        );

        result
    }
}
