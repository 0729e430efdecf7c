//! 场景套件加载
//!
//! 套件文件有两种形式:
//! - 内联表格: JSON / YAML 文档，直接包含 `designs`、`plans`、`actions`
//! - 清单: 包含 `tables` 段，分别指向三张表格文件 (CSV 或 JSON / YAML)，路径相对于清单文件
//!
//! CSV 单元格中列表以 `;` 分隔，映射写作 `k=v;k=v`，布尔值接受 `Y/N/yes/no/true/false/1/0`。

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use pad_common::{is_blank_cell, RunStatus};

use crate::scenario::{Action, Design, Plan, PlanStep, ScenarioTables};
use crate::{ExecutorError, Result};

/// 一个场景套件
#[derive(Debug, Clone)]
pub struct Suite {
    /// 套件名称 (文件名去掉扩展名)
    pub name: String,
    pub path: PathBuf,
    pub tables: ScenarioTables,
}

/// 套件文件内容
#[derive(Debug, Deserialize)]
struct SuiteFile {
    #[serde(default)]
    tables: Option<TableFiles>,

    #[serde(flatten)]
    inline: ScenarioTables,
}

/// 三张表格文件的位置
#[derive(Debug, Deserialize)]
struct TableFiles {
    designs: PathBuf,
    plans: PathBuf,
    actions: PathBuf,
}

/// 加载场景套件
pub fn load_suite(path: &Path) -> Result<Suite> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("suite")
        .to_string();

    let file: SuiteFile = read_document(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let tables = match file.tables {
        Some(files) => {
            debug!("套件 {} 使用外部表格文件", name);
            ScenarioTables {
                designs: load_table(&base.join(&files.designs), design_from_row)?,
                plans: load_table(&base.join(&files.plans), plan_from_row)?,
                actions: load_table(&base.join(&files.actions), action_from_row)?,
            }
        }
        None => file.inline,
    };

    info!(
        "加载套件 {}: {} 个 Design, {} 个 Plan, {} 个 Action",
        name,
        tables.designs.len(),
        tables.plans.len(),
        tables.actions.len()
    );

    Ok(Suite {
        name,
        path: path.to_path_buf(),
        tables,
    })
}

/// 按扩展名解析 JSON / YAML 文档
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        ExecutorError::TableLoad(format!("无法读取文件 {:?}: {}", path, e))
    })?;

    match extension(path).as_str() {
        "json" => serde_json::from_str(&content)
            .map_err(|e| ExecutorError::TableLoad(format!("{:?}: {}", path, e))),
        "yaml" | "yml" => serde_yaml::from_str(&content)
            .map_err(|e| ExecutorError::TableLoad(format!("{:?}: {}", path, e))),
        _ => Err(ExecutorError::TableLoad(format!(
            "不支持的文件格式: {:?}",
            path
        ))),
    }
}

/// 加载单张表格: CSV 按行转换，JSON / YAML 直接反序列化为记录列表
fn load_table<R, T, F>(path: &Path, convert: F) -> Result<Vec<T>>
where
    R: DeserializeOwned,
    T: DeserializeOwned,
    F: Fn(R) -> Result<T>,
{
    if extension(path) != "csv" {
        return read_document(path);
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ExecutorError::TableLoad(format!("{:?}: {}", path, e)))?;

    let mut records = Vec::new();
    for (index, row) in reader.deserialize::<R>().enumerate() {
        // 表头占第 1 行
        let line = index + 2;
        let record = row
            .map_err(ExecutorError::from)
            .and_then(&convert)
            .map_err(|e| ExecutorError::TableLoad(format!("{:?} 第 {} 行: {}", path, line, e)))?;
        records.push(record);
    }

    debug!("从 {:?} 读取 {} 行", path, records.len());
    Ok(records)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct DesignRow {
    #[serde(rename = "DesignId")]
    id: String,
    #[serde(rename = "Plans", default)]
    plans: String,
    #[serde(rename = "Inputs", default)]
    inputs: String,
    #[serde(rename = "Expected", default)]
    expected: String,
    #[serde(rename = "Run", default)]
    run: String,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    #[serde(rename = "PlanId")]
    id: String,
    #[serde(rename = "Steps", default)]
    steps: String,
    #[serde(rename = "Inputs", default)]
    inputs: String,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ActionRow {
    #[serde(rename = "ActionId")]
    id: String,
    #[serde(rename = "Capability")]
    capability: String,
    #[serde(rename = "Verb")]
    verb: String,
    #[serde(rename = "Target", default)]
    target: String,
    #[serde(rename = "Params", default)]
    params: String,
    #[serde(rename = "Expected", default)]
    expected: String,
    #[serde(rename = "ContinueOnFailure", default)]
    continue_on_failure: String,
    #[serde(rename = "Optional", default)]
    optional: String,
    #[serde(rename = "Timeout", default)]
    timeout: String,
    #[serde(rename = "Description", default)]
    description: String,
}

fn design_from_row(row: DesignRow) -> Result<Design> {
    let expected = if is_blank_cell(&row.expected) {
        None
    } else {
        Some(parse_run_status(&row.expected)?)
    };

    Ok(Design {
        id: row.id,
        plans: parse_list(&row.plans),
        inputs: parse_map(&row.inputs)?,
        expected,
        run: parse_flag(&row.run, true)?,
        description: optional_text(row.description),
    })
}

fn plan_from_row(row: PlanRow) -> Result<Plan> {
    let steps = parse_list(&row.steps)
        .iter()
        .map(|s| s.parse::<PlanStep>())
        .collect::<Result<Vec<_>>>()?;

    Ok(Plan {
        id: row.id,
        steps,
        inputs: parse_map(&row.inputs)?,
        description: optional_text(row.description),
    })
}

fn action_from_row(row: ActionRow) -> Result<Action> {
    let timeout_seconds = if row.timeout.is_empty() {
        None
    } else {
        Some(row.timeout.parse::<f64>().map_err(|_| {
            ExecutorError::TableLoad(format!("无效的超时值: {}", row.timeout))
        })?)
    };

    Ok(Action {
        id: row.id,
        capability: row.capability,
        verb: row.verb,
        target: row.target,
        params: parse_map(&row.params)?,
        expected: optional_text(row.expected),
        continue_on_failure: parse_flag(&row.continue_on_failure, false)?,
        optional: parse_flag(&row.optional, false)?,
        timeout_seconds,
        description: optional_text(row.description),
    })
}

/// `a;b;c`
fn parse_list(cell: &str) -> Vec<String> {
    cell.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `k=v;k=v`
fn parse_map(cell: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in parse_list(cell) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ExecutorError::TableLoad(format!("参数格式应为 key=value: {}", pair))
        })?;
        map.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(map)
}

fn parse_flag(cell: &str, default: bool) -> Result<bool> {
    match cell.trim().to_lowercase().as_str() {
        "" => Ok(default),
        "y" | "yes" | "true" | "1" => Ok(true),
        "n" | "no" | "false" | "0" => Ok(false),
        other => Err(ExecutorError::TableLoad(format!("无效的布尔值: {}", other))),
    }
}

fn parse_run_status(cell: &str) -> Result<RunStatus> {
    match cell.trim().to_lowercase().as_str() {
        "passed" | "pass" => Ok(RunStatus::Passed),
        "failed" | "fail" => Ok(RunStatus::Failed),
        other => Err(ExecutorError::TableLoad(format!(
            "无效的期望结果: {} (应为 Passed 或 Failed)",
            other
        ))),
    }
}

fn optional_text(cell: String) -> Option<String> {
    if cell.trim().is_empty() {
        None
    } else {
        Some(cell)
    }
}
