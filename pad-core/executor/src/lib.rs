//! PAD 执行器
//!
//! Action-Plan 执行引擎: 把 Design 经 Plan 展开为有序动作序列，
//! 在有界工作者池中并发执行，并按提交顺序汇总结果。

pub mod aggregator;
pub mod config;
pub mod loader;
pub mod runner;
pub mod scenario;
pub mod scheduler;
pub mod step;

pub use aggregator::{Aggregator, ReportSink, RunCounts, StatusCounts, Summary};
pub use config::{EngineConfig, RunConfig};
pub use loader::{load_suite, Suite};
pub use runner::{PlanRunner, RunResult};
pub use scenario::{Action, Design, Plan, PlanStep, ResolvedRun, ScenarioModel, ScenarioTables};
pub use scheduler::{DesignState, ProgressEvent, ProgressObserver, ResultSet, Scheduler};
pub use step::{ActionExecutor, StepResult};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("引用无法解析: {0}")]
    UnresolvedReference(String),

    #[error("Plan 存在循环引用: {0}")]
    CyclicPlan(String),

    #[error("ID 重复: {0}")]
    DuplicateId(String),

    #[error("能力 {0} 不存在")]
    UnknownCapability(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("表格加载失败: {0}")]
    TableLoad(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(String),

    #[error("报告生成失败: {0}")]
    Report(String),
}

impl ExecutorError {
    /// 是否为加载期错误 (必须在任何执行开始前中止运行)
    pub fn is_load_time(&self) -> bool {
        matches!(
            self,
            ExecutorError::UnresolvedReference(_)
                | ExecutorError::CyclicPlan(_)
                | ExecutorError::DuplicateId(_)
                | ExecutorError::UnknownCapability(_)
                | ExecutorError::Configuration(_)
                | ExecutorError::TableLoad(_)
        )
    }
}

impl From<csv::Error> for ExecutorError {
    fn from(e: csv::Error) -> Self {
        ExecutorError::TableLoad(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
