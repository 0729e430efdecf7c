//! Run 命令处理
//!
//! 先加载并解析所有套件，全部通过校验后才依次执行。

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use pad_common::RunStatus;
use pad_executor::{
    Aggregator, ProgressEvent, ProgressObserver, ResultSet, RunConfig, Scheduler, Summary,
};

use super::common::{self, PreparedSuite};
use super::output;
use crate::report::{suite_dir, CsvReportSink, HtmlDashboardSink};

/// run 命令参数
pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub workers: Option<i64>,
    pub timeout: Option<f64>,
    pub output: Option<PathBuf>,
    pub format: String,
    pub debug: bool,
}

/// JSON 输出中的单个套件
#[derive(Serialize)]
struct SuiteReport<'a> {
    suite: &'a str,
    report_dir: PathBuf,
    summary: &'a Summary,
    results: &'a ResultSet,
}

/// 命令行参数覆盖配置文件
fn apply_args(config: &mut RunConfig, args: &RunArgs) {
    if let Some(workers) = args.workers {
        config.worker_count = workers;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_seconds = timeout;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if args.debug {
        config.debug = true;
    }
}

fn artifact_dir(report_dir: &Path, debug: bool) -> PathBuf {
    if debug {
        report_dir.join("_debug")
    } else {
        report_dir.to_path_buf()
    }
}

fn progress_bar(total: usize, hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(progress)
}

fn progress_observer(progress: ProgressBar) -> ProgressObserver {
    Arc::new(move |event: &ProgressEvent| match event {
        ProgressEvent::Started {
            design_id, worker, ..
        } => progress.set_message(format!("{} (工作者 {})", design_id, worker)),
        ProgressEvent::Finished { .. } => progress.inc(1),
    })
}

/// 执行全部套件，返回是否所有 Design 都通过
pub async fn handle(args: RunArgs, level: Level) -> Result<bool> {
    let mut config = common::load_config(args.config.as_deref())?;
    apply_args(&mut config, &args);
    crate::init_logging(if config.debug { Level::DEBUG } else { level });

    let engine = config.engine_config()?;
    let registry = common::build_registry(&config)?;
    let suites = common::prepare_suites(&config, &registry)?;

    let json = args.format == "json";
    let output_dir = common::expand_path(&config.output_dir);
    let aggregator = Aggregator::new()
        .with_sink(Box::new(CsvReportSink::new(&output_dir)))
        .with_sink(Box::new(HtmlDashboardSink::new(&output_dir)));

    info!(
        "开始执行 {} 个套件 (工作者 {}, 单步超时 {:?})",
        suites.len(),
        engine.worker_count,
        engine.step_timeout
    );

    let mut all_passed = true;
    let mut report_error = None;
    let mut finished = Vec::with_capacity(suites.len());

    for PreparedSuite { name, runs, .. } in suites {
        if !json {
            println!("\n{} {} ({} 个 Design)", "▶".cyan(), name.bold(), runs.len());
        }

        // 失败现场写入报告目录，调试模式下写入其中的 _debug 子目录
        let started_at = Local::now();
        let report_dir = suite_dir(&output_dir, &name, &started_at);
        let artifacts = artifact_dir(&report_dir, config.debug);

        let progress = progress_bar(runs.len(), json)?;
        let scheduler = Scheduler::new(Arc::clone(&registry), engine.clone())
            .with_observer(progress_observer(progress.clone()))
            .with_started_at(started_at)
            .with_artifact_dir(artifacts);
        let results = scheduler.submit(runs).await;
        progress.finish_and_clear();

        let summary = match aggregator.publish(&name, &results) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("套件 {} 报告输出失败: {}", name, e);
                if report_error.is_none() {
                    report_error = Some(e);
                }
                aggregator.summarize(&results)
            }
        };

        all_passed &= results.all_passed();

        if !json {
            output::print_suite_summary(&name, &results, &summary);
            println!("报告目录: {}", report_dir.display().to_string().bright_black());
        }
        finished.push((name, report_dir, summary, results));
    }

    if json {
        let reports: Vec<SuiteReport<'_>> = finished
            .iter()
            .map(|(name, report_dir, summary, results)| SuiteReport {
                suite: name,
                report_dir: report_dir.clone(),
                summary,
                results,
            })
            .collect();
        output::print_json(&reports)?;
    } else {
        let verdict = if all_passed {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };
        println!("\n总体结果: {}", output::color_run_status(verdict).bold());
    }

    if let Some(e) = report_error {
        return Err(anyhow::Error::new(e).context("报告输出失败"));
    }

    Ok(all_passed)
}
