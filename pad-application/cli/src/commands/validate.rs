//! Validate 命令处理
//!
//! 加载并解析全部套件，只报告展开结果，不执行任何动作。

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use pad_executor::ResolvedRun;

use super::common::{self, PreparedSuite};
use super::output::{print_table, TableRow};

/// 校验结果中的一行
struct ResolvedRow {
    suite: String,
    design_id: String,
    steps: usize,
    expected: String,
}

impl ResolvedRow {
    fn new(suite: &str, run: &ResolvedRun) -> Self {
        Self {
            suite: suite.to_string(),
            design_id: run.design_id().to_string(),
            steps: run.len(),
            expected: run
                .expected()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

impl TableRow for ResolvedRow {
    fn headers() -> Vec<&'static str> {
        vec!["套件", "Design", "步骤数", "期望"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.suite.clone(),
            self.design_id.clone(),
            self.steps.to_string(),
            self.expected.clone(),
        ]
    }
}

fn rows(suites: &[PreparedSuite]) -> Vec<ResolvedRow> {
    suites
        .iter()
        .flat_map(|suite| suite.runs.iter().map(move |run| ResolvedRow::new(&suite.name, run)))
        .collect()
}

pub async fn handle(config: Option<PathBuf>) -> Result<bool> {
    let config = common::load_config(config.as_deref())?;
    config.engine_config()?;
    let registry = common::build_registry(&config)?;
    let suites = common::prepare_suites(&config, &registry)?;

    for suite in &suites {
        println!(
            "{} {} ({:?}): {} 个 Design, {} 个步骤",
            "✓".green().bold(),
            suite.name.cyan(),
            suite.path,
            suite.runs.len(),
            suite.step_count()
        );
    }
    println!();
    print_table(&rows(&suites));

    Ok(true)
}
