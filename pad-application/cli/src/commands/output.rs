//! CLI 通用输出格式化模块
//!
//! 提供表格和 JSON 两种输出格式，以及套件执行结果的控制台汇总。

use anyhow::Result;
use colored::{ColoredString, Colorize};
use serde::Serialize;

use pad_common::{RunStatus, StepStatus};
use pad_executor::{ResultSet, RunResult, Summary};

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;
}

/// 表格格式输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let headers = T::headers();

    let header_line: String = headers
        .iter()
        .map(|h| format!("{:<20}", h))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", header_line.bold());
    println!("{}", "-".repeat(header_line.len()));

    for item in items {
        let row_line: String = item
            .row()
            .iter()
            .map(|c| format!("{:<20}", c))
            .collect::<Vec<_>>()
            .join(" ");
        println!("{}", row_line.trim_end());
    }
}

/// JSON 格式输出
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn color_run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Passed => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Skipped => status.as_str().yellow(),
    }
}

pub fn color_step_status(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Passed => status.as_str().green(),
        StepStatus::Skipped => status.as_str().yellow(),
        _ => status.as_str().red(),
    }
}

impl TableRow for RunResult {
    fn headers() -> Vec<&'static str> {
        vec!["Design", "状态", "期望", "步骤 (通过/总数)", "耗时 (ms)"]
    }

    fn row(&self) -> Vec<String> {
        let expected = match (self.expected, self.expectation_met) {
            (Some(e), Some(false)) => format!("{} (不符)", e),
            (Some(e), _) => e.to_string(),
            (None, _) => "-".to_string(),
        };

        vec![
            self.design_id.clone(),
            self.status.to_string(),
            expected,
            format!("{}/{}", self.count(StepStatus::Passed), self.steps.len()),
            self.duration_ms.to_string(),
        ]
    }
}

/// 打印一个套件的执行汇总
pub fn print_suite_summary(suite: &str, results: &ResultSet, summary: &Summary) {
    println!("\n{}", "=".repeat(60));
    println!("套件: {}", suite.cyan().bold());
    println!("{}", "=".repeat(60));
    println!();

    print_table(&results.runs);
    println!();

    println!(
        "Design: 总数 {}, 通过 {}, 失败 {}, 跳过 {}",
        summary.runs.total().to_string().bright_blue(),
        summary.runs.passed.to_string().green(),
        summary.runs.failed.to_string().red(),
        summary.runs.skipped.to_string().yellow()
    );

    let steps: Vec<String> = StepStatus::ALL
        .iter()
        .map(|status| format!("{} {}", color_step_status(*status), summary.steps.get(*status)))
        .collect();
    println!(
        "步骤:   总数 {}, {}",
        summary.steps.total().to_string().bright_blue(),
        steps.join(", ")
    );

    if summary.expectation_mismatches > 0 {
        println!(
            "期望不符: {}",
            summary.expectation_mismatches.to_string().red()
        );
    }
    println!("通过率: {:.2}%", summary.pass_rate);
    println!("耗时:   {} ms", summary.duration_ms.to_string().yellow());

    // 失败步骤详情
    let failures: Vec<_> = results
        .runs
        .iter()
        .flat_map(|run| run.steps.iter().map(move |step| (run, step)))
        .filter(|(_, step)| step.status.is_failure())
        .collect();

    if !failures.is_empty() {
        println!("\n失败步骤:");
        for (run, step) in failures {
            println!(
                "  {} {} / {} [{}]: {}",
                "✗".red(),
                run.design_id,
                step.description,
                color_step_status(step.status),
                step.error.as_deref().unwrap_or("-").bright_black()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pad_executor::ResolvedRun;
    use pad_common::ResolvedAction;

    #[test]
    fn test_run_result_row() {
        let run = ResolvedRun::new("D7", vec![ResolvedAction::new("a1", "math", "add")])
            .with_expected(RunStatus::Passed);
        let result = RunResult::skipped(&run, "超过整体运行时限");

        let row = result.row();
        assert_eq!(row.len(), RunResult::headers().len());
        assert_eq!(row[0], "D7");
        assert_eq!(row[1], "Skipped");
        assert_eq!(row[2], "Passed (不符)");
        assert_eq!(row[3], "0/1");
    }
}
