//! 公共工具函数模块
//!
//! 提供各命令模块共享的功能，包括：
//! - 配置文件加载和路径展开
//! - 内置能力注册表创建
//! - 场景套件加载与解析

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use pad_capability::{builtin_registry, CapabilityRegistry};
use pad_executor::{load_suite, ExecutorError, ResolvedRun, RunConfig, ScenarioModel, Suite};

/// 已解析、可直接提交执行的套件
pub struct PreparedSuite {
    pub name: String,
    pub path: PathBuf,
    pub runs: Vec<ResolvedRun>,
}

impl PreparedSuite {
    /// 全部 Design 的步骤总数
    pub fn step_count(&self) -> usize {
        self.runs.iter().map(ResolvedRun::len).sum()
    }
}

/// 展开路径中的 `~`
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

/// 加载运行配置
pub fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    let expanded = path.map(expand_path);
    let config = RunConfig::load(expanded.as_deref()).context("加载配置失败")?;
    Ok(config)
}

/// 创建内置能力注册表
pub fn build_registry(config: &RunConfig) -> Result<Arc<CapabilityRegistry>> {
    let registry = builtin_registry(&config.provider_config()).map_err(|e| {
        ExecutorError::Configuration(format!("初始化内置能力失败: {}", e))
    })?;
    Ok(Arc::new(registry))
}

/// 加载并解析配置中的全部套件
///
/// 任何一个套件出现加载期错误都会在执行开始前返回。
pub fn prepare_suites(
    config: &RunConfig,
    registry: &CapabilityRegistry,
) -> Result<Vec<PreparedSuite>> {
    let files = config.resolved_scenario_files();
    if files.is_empty() {
        return Err(ExecutorError::Configuration(
            "配置中没有场景套件 (scenario_files)".to_string(),
        )
        .into());
    }

    let mut suites = Vec::with_capacity(files.len());
    for file in files {
        let file = expand_path(&file);
        let Suite { name, path, tables } =
            load_suite(&file).with_context(|| format!("加载套件失败: {:?}", file))?;

        let model = ScenarioModel::build(tables, registry)
            .with_context(|| format!("套件 {} 解析失败", name))?;
        let runs = model
            .resolve_all()
            .with_context(|| format!("套件 {} 展开失败", name))?;

        info!("套件 {} 解析完成: {} 个待执行 Design", name, runs.len());
        suites.push(PreparedSuite { name, path, runs });
    }

    Ok(suites)
}
