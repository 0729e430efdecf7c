//! 报告输出
//!
//! 每个套件写入 `<output_dir>/<YYYYmmdd_HHMMSS>_<suite>/`:
//! - `<suite>_results.csv`: 每个步骤一行
//! - `<suite>_errors.csv`: 未通过且未跳过的步骤
//! - `<suite>_dashboard.html`: 汇总页面

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use pad_common::StepStatus;
use pad_executor::{ExecutorError, ReportSink, ResultSet, RunResult, StepResult, Summary};

/// 单元格中输出内容的最大字符数，超出部分写入独立文件
pub const OUTPUT_CELL_LIMIT: usize = 140;

const RESULT_COLUMNS: [&str; 14] = [
    "DesignId",
    "PlanPath",
    "StepIndex",
    "ActionId",
    "Description",
    "Capability",
    "Verb",
    "Target",
    "Output",
    "Expected",
    "Status",
    "Error",
    "Timestamp",
    "DurationMs",
];

/// 套件报告目录
pub fn suite_dir(output_dir: &Path, suite: &str, started_at: &DateTime<Local>) -> PathBuf {
    output_dir.join(format!(
        "{}_{}",
        started_at.format("%Y%m%d_%H%M%S"),
        file_safe(suite)
    ))
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn report_error(context: &str, path: &Path, e: impl std::fmt::Display) -> ExecutorError {
    ExecutorError::Report(format!("{} {:?}: {}", context, path, e))
}

fn ensure_dir(dir: &Path) -> pad_executor::Result<()> {
    fs::create_dir_all(dir).map_err(|e| report_error("无法创建报告目录", dir, e))
}

// ==========================================
// CSV
// ==========================================

#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    design_id: &'a str,
    plan_path: &'a str,
    step_index: usize,
    action_id: &'a str,
    description: &'a str,
    capability: &'a str,
    verb: &'a str,
    target: &'a str,
    output: String,
    expected: &'a str,
    status: &'static str,
    error: &'a str,
    timestamp: String,
    duration_ms: u64,
}

/// CSV 结果文件输出
pub struct CsvReportSink {
    output_dir: PathBuf,
}

impl CsvReportSink {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// 超长输出写入 `<design>_<step>.txt`，单元格中保留截断内容和文件链接
    fn output_cell(
        &self,
        dir: &Path,
        run: &RunResult,
        step: &StepResult,
    ) -> pad_executor::Result<String> {
        let output = step.output.as_deref().unwrap_or("");
        if output.chars().count() <= OUTPUT_CELL_LIMIT {
            return Ok(output.to_string());
        }

        let file_name = format!("{}_{}.txt", file_safe(&run.design_id), step.step_index);
        let path = dir.join(&file_name);
        fs::write(&path, output).map_err(|e| report_error("无法写入输出文件", &path, e))?;
        debug!("步骤输出过长，写入 {:?}", path);

        let head: String = output.chars().take(OUTPUT_CELL_LIMIT).collect();
        Ok(format!("{}... [详见 {}]", head, file_name))
    }

    fn write_rows(path: &Path, rows: &[&ResultRow<'_>]) -> pad_executor::Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)
            .map_err(|e| report_error("无法创建 CSV 文件", path, e))?;

        writer
            .write_record(RESULT_COLUMNS)
            .map_err(|e| report_error("写入 CSV 失败", path, e))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| report_error("写入 CSV 失败", path, e))?;
        }
        writer
            .flush()
            .map_err(|e| report_error("写入 CSV 失败", path, e))
    }
}

impl ReportSink for CsvReportSink {
    fn name(&self) -> &str {
        "csv"
    }

    fn publish(
        &self,
        suite: &str,
        results: &ResultSet,
        _summary: &Summary,
    ) -> pad_executor::Result<()> {
        let dir = suite_dir(&self.output_dir, suite, &results.started_at);
        ensure_dir(&dir)?;

        let mut rows = Vec::new();
        for run in &results.runs {
            for step in &run.steps {
                rows.push(ResultRow {
                    design_id: &run.design_id,
                    plan_path: &step.plan_path,
                    step_index: step.step_index,
                    action_id: &step.action_id,
                    description: &step.description,
                    capability: &step.capability,
                    verb: &step.verb,
                    target: &step.target,
                    output: self.output_cell(&dir, run, step)?,
                    expected: step.expected.as_deref().unwrap_or(""),
                    status: step.status.as_str(),
                    error: step.error.as_deref().unwrap_or(""),
                    timestamp: step.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
                    duration_ms: step.duration_ms,
                });
            }
        }

        let file_stem = file_safe(suite);
        let all: Vec<&ResultRow<'_>> = rows.iter().collect();
        Self::write_rows(&dir.join(format!("{}_results.csv", file_stem)), &all)?;

        let errors: Vec<&ResultRow<'_>> = results
            .runs
            .iter()
            .flat_map(|run| run.steps.iter())
            .zip(rows.iter())
            .filter(|(step, _)| !matches!(step.status, StepStatus::Passed | StepStatus::Skipped))
            .map(|(_, row)| row)
            .collect();
        Self::write_rows(&dir.join(format!("{}_errors.csv", file_stem)), &errors)?;

        info!(
            "CSV 报告已写入 {:?} ({} 行, 其中错误 {} 行)",
            dir,
            rows.len(),
            errors.len()
        );
        Ok(())
    }
}

// ==========================================
// HTML
// ==========================================

/// HTML 汇总页面输出
pub struct HtmlDashboardSink {
    output_dir: PathBuf,
}

impl HtmlDashboardSink {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }
}

impl ReportSink for HtmlDashboardSink {
    fn name(&self) -> &str {
        "html"
    }

    fn publish(
        &self,
        suite: &str,
        results: &ResultSet,
        summary: &Summary,
    ) -> pad_executor::Result<()> {
        let dir = suite_dir(&self.output_dir, suite, &results.started_at);
        ensure_dir(&dir)?;

        let path = dir.join(format!("{}_dashboard.html", file_safe(suite)));
        fs::write(&path, render_dashboard(suite, results, summary))
            .map_err(|e| report_error("无法写入 HTML 报告", &path, e))?;

        info!("HTML 报告已写入 {:?}", path);
        Ok(())
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn status_class(status: &str) -> &'static str {
    match status {
        "Passed" => "passed",
        "Skipped" => "skipped",
        _ => "failed",
    }
}

/// 渲染汇总页面
pub fn render_dashboard(suite: &str, results: &ResultSet, summary: &Summary) -> String {
    let mut html = String::new();
    let title = escape(suite);

    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title} - PAD 测试报告</title>
<style>
body {{ font-family: sans-serif; margin: 24px; }}
table {{ border-collapse: collapse; margin-bottom: 24px; }}
th, td {{ border: 1px solid #ccc; padding: 4px 8px; text-align: left; }}
th {{ background: #f0f0f0; }}
.passed {{ color: #1a7f37; }}
.failed {{ color: #cf222e; }}
.skipped {{ color: #9a6700; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>开始: {start} &nbsp; 结束: {end} &nbsp; 耗时: {duration} ms &nbsp; 通过率: {rate:.2}%</p>
"#,
        title = title,
        start = results.started_at.format("%Y-%m-%d %H:%M:%S"),
        end = results.finished_at.format("%Y-%m-%d %H:%M:%S"),
        duration = summary.duration_ms,
        rate = summary.pass_rate,
    );

    html.push_str("<h2>Design 汇总</h2>\n<table>\n<tr><th>总数</th><th>Passed</th><th>Failed</th><th>Skipped</th><th>期望不符</th></tr>\n");
    let _ = writeln!(
        html,
        "<tr><td>{}</td><td class=\"passed\">{}</td><td class=\"failed\">{}</td><td class=\"skipped\">{}</td><td>{}</td></tr>\n</table>",
        summary.runs.total(),
        summary.runs.passed,
        summary.runs.failed,
        summary.runs.skipped,
        summary.expectation_mismatches
    );

    html.push_str("<h2>步骤汇总</h2>\n<table>\n<tr><th>总数</th>");
    for status in StepStatus::ALL {
        let _ = write!(html, "<th>{}</th>", status.as_str());
    }
    let _ = write!(html, "</tr>\n<tr><td>{}</td>", summary.steps.total());
    for status in StepStatus::ALL {
        let _ = write!(
            html,
            "<td class=\"{}\">{}</td>",
            status_class(status.as_str()),
            summary.steps.get(status)
        );
    }
    html.push_str("</tr>\n</table>\n");

    html.push_str("<h2>Design 列表</h2>\n<table>\n<tr><th>Design</th><th>描述</th><th>状态</th><th>期望</th><th>步骤</th><th>耗时 (ms)</th></tr>\n");
    for run in &results.runs {
        let _ = writeln!(
            html,
            "<tr><td><a href=\"#{id}\">{id}</a></td><td>{desc}</td><td class=\"{class}\">{status}</td><td>{expected}</td><td>{steps}</td><td>{duration}</td></tr>",
            id = escape(&run.design_id),
            desc = escape(run.description.as_deref().unwrap_or("")),
            class = status_class(run.status.as_str()),
            status = run.status.as_str(),
            expected = run.expected.map(|e| e.as_str()).unwrap_or("-"),
            steps = run.steps.len(),
            duration = run.duration_ms,
        );
    }
    html.push_str("</table>\n");

    for run in &results.runs {
        let _ = writeln!(
            html,
            "<h3 id=\"{id}\">{id}</h3>\n<table>\n<tr><th>#</th><th>Plan</th><th>Action</th><th>描述</th><th>能力</th><th>操作</th><th>目标</th><th>输出</th><th>期望</th><th>状态</th><th>错误</th><th>耗时 (ms)</th></tr>",
            id = escape(&run.design_id)
        );
        for step in &run.steps {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td></tr>",
                step.step_index,
                escape(&step.plan_path),
                escape(&step.action_id),
                escape(&step.description),
                escape(&step.capability),
                escape(&step.verb),
                escape(&step.target),
                escape(step.output.as_deref().unwrap_or("")),
                escape(step.expected.as_deref().unwrap_or("")),
                status_class(step.status.as_str()),
                step.status.as_str(),
                escape(step.error.as_deref().unwrap_or("")),
                step.duration_ms,
            );
        }
        html.push_str("</table>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}
