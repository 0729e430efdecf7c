//! 结果汇总
//!
//! 统计结果集中各状态的数量，并把结果集和汇总交给报告输出。

use serde::Serialize;
use tracing::{info, warn};

use pad_common::{RunStatus, StepStatus};

use crate::scheduler::ResultSet;
use crate::Result;

/// 步骤状态计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: StepStatus) {
        match status {
            StepStatus::Passed => self.passed += 1,
            StepStatus::Failed => self.failed += 1,
            StepStatus::Errored => self.errored += 1,
            StepStatus::TimedOut => self.timed_out += 1,
            StepStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn get(&self, status: StepStatus) -> usize {
        match status {
            StepStatus::Passed => self.passed,
            StepStatus::Failed => self.failed,
            StepStatus::Errored => self.errored,
            StepStatus::TimedOut => self.timed_out,
            StepStatus::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored + self.timed_out + self.skipped
    }

    /// 实际执行过的步骤数
    pub fn executed(&self) -> usize {
        self.total() - self.skipped
    }
}

/// Design 状态计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunCounts {
    pub fn record(&mut self, status: RunStatus) {
        match status {
            RunStatus::Passed => self.passed += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// 结果汇总
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub runs: RunCounts,
    pub steps: StatusCounts,

    /// 声明了期望结果但未达到的 Design 数
    pub expectation_mismatches: usize,

    /// 总耗时（毫秒）
    pub duration_ms: u64,

    /// Design 通过率 (百分比)
    pub pass_rate: f64,
}

impl Summary {
    pub fn from_result_set(results: &ResultSet) -> Self {
        let mut runs = RunCounts::default();
        let mut steps = StatusCounts::default();
        let mut expectation_mismatches = 0;

        for run in &results.runs {
            runs.record(run.status);
            if run.expectation_met == Some(false) {
                expectation_mismatches += 1;
            }
            for step in &run.steps {
                steps.record(step.status);
            }
        }

        let pass_rate = if runs.total() > 0 {
            runs.passed as f64 * 100.0 / runs.total() as f64
        } else {
            0.0
        };

        Self {
            runs,
            steps,
            expectation_mismatches,
            duration_ms: results.duration_ms(),
            pass_rate,
        }
    }
}

/// 报告输出
pub trait ReportSink: Send + Sync {
    /// 输出名称 (用于日志)
    fn name(&self) -> &str;

    /// 输出一个套件的结果
    fn publish(&self, suite: &str, results: &ResultSet, summary: &Summary) -> Result<()>;
}

/// 结果汇总器
#[derive(Default)]
pub struct Aggregator {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// 只计算汇总，不产生副作用
    pub fn summarize(&self, results: &ResultSet) -> Summary {
        Summary::from_result_set(results)
    }

    /// 计算汇总并交给所有报告输出
    ///
    /// 单个输出失败不影响其他输出，返回遇到的第一个错误。
    pub fn publish(&self, suite: &str, results: &ResultSet) -> Result<Summary> {
        let summary = self.summarize(results);
        info!(
            "套件 {} 汇总: {} 个 Design, 通过 {}, 失败 {}, 跳过 {}",
            suite,
            summary.runs.total(),
            summary.runs.passed,
            summary.runs.failed,
            summary.runs.skipped
        );

        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.publish(suite, results, &summary) {
                warn!("报告输出 {} 失败: {}", sink.name(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunResult;
    use crate::scenario::ResolvedRun;
    use crate::ExecutorError;
    use chrono::Local;
    use pad_common::ResolvedAction;
    use std::sync::{Arc, Mutex};

    fn result_set() -> ResultSet {
        let run = ResolvedRun::new(
            "D1",
            vec![
                ResolvedAction::new("a1", "math", "add"),
                ResolvedAction::new("a2", "math", "add"),
            ],
        );
        let expected = ResolvedRun::new("D2", vec![ResolvedAction::new("b1", "http", "GET")])
            .with_expected(RunStatus::Passed);

        ResultSet {
            runs: vec![
                RunResult::errored(&run, "boom"),
                RunResult::skipped(&expected, "超过整体运行时限"),
            ],
            started_at: Local::now(),
            finished_at: Local::now(),
            peak_running: 1,
        }
    }

    struct RecordingSink {
        seen: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl ReportSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn publish(&self, suite: &str, results: &ResultSet, _summary: &Summary) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", suite, results.len()));
            if self.fail {
                return Err(ExecutorError::Report("disk full".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_summary_counts() {
        let summary = Summary::from_result_set(&result_set());

        assert_eq!(summary.runs.failed, 1);
        assert_eq!(summary.runs.skipped, 1);
        assert_eq!(summary.steps.errored, 1);
        assert_eq!(summary.steps.skipped, 2);
        assert_eq!(summary.steps.total(), 3);
        assert_eq!(summary.steps.executed(), 1);
        assert_eq!(summary.expectation_mismatches, 1);
        assert_eq!(summary.pass_rate, 0.0);
    }

    #[test]
    fn test_publish_reaches_every_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let aggregator = Aggregator::new()
            .with_sink(Box::new(RecordingSink {
                seen: seen.clone(),
                fail: true,
            }))
            .with_sink(Box::new(RecordingSink {
                seen: seen.clone(),
                fail: false,
            }));

        let result = aggregator.publish("smoke", &result_set());
        assert!(matches!(result, Err(ExecutorError::Report(_))));
        assert_eq!(*seen.lock().unwrap(), vec!["smoke:2", "smoke:2"]);
    }

    #[test]
    fn test_summarize_does_not_mutate() {
        let results = result_set();
        let before = results.runs.clone();
        let aggregator = Aggregator::new();
        let first = aggregator.summarize(&results);
        let second = aggregator.summarize(&results);
        assert_eq!(first, second);
        assert_eq!(results.runs, before);
    }
}
