//! 运行配置
//!
//! 支持从多个源加载:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/YAML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `PAD_CONFIG` 环境变量指定的路径
//! 2. `./fStart.json` (当前目录)
//! 3. `./pad.toml` (当前目录)
//! 4. `~/.config/pad/pad.toml` (用户配置目录)

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use pad_capability::ProviderConfig;

use crate::{ExecutorError, Result};

/// 启动器配置 (顶层)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// 场景套件文件
    #[serde(default, alias = "configs")]
    pub scenario_files: Vec<PathBuf>,

    /// 并发工作者数量
    #[serde(default = "default_worker_count", alias = "thread_count")]
    pub worker_count: i64,

    /// 单步默认超时 (秒)
    #[serde(default = "default_timeout", alias = "timeout")]
    pub timeout_seconds: f64,

    /// 整体运行超时 (秒)，超时后尚未开始的 Design 标记为 Skipped
    #[serde(default)]
    pub run_timeout_seconds: Option<f64>,

    /// 调试日志
    #[serde(default)]
    pub debug: bool,

    /// 报告输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// WebDriver 服务地址
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// 浏览器无头模式
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Chat Completions 接口地址 (未设置时使用 OpenAI)
    #[serde(default)]
    pub ai_endpoint: Option<String>,

    /// 配置文件所在目录 (用于解析相对路径)
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_worker_count() -> i64 {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.min(4) as i64
}

fn default_timeout() -> f64 {
    6.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_headless() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scenario_files: Vec::new(),
            worker_count: default_worker_count(),
            timeout_seconds: default_timeout(),
            run_timeout_seconds: None,
            debug: false,
            output_dir: default_output_dir(),
            webdriver_url: default_webdriver_url(),
            headless: default_headless(),
            ai_endpoint: None,
            base_dir: None,
        }
    }
}

impl RunConfig {
    /// 加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    ///
    /// `path` 为空时按搜索路径查找配置文件。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_config_file() {
                Some(path) => {
                    debug!("加载配置文件: {:?}", path);
                    Self::load_from_file(&path)?
                }
                None => {
                    debug!("未找到配置文件，使用默认配置");
                    Self::default()
                }
            },
        };

        config.apply_env_vars()?;
        Ok(config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExecutorError::Configuration(format!("无法读取配置文件 {:?}: {}", path, e))
        })?;

        let parse_error =
            |e: String| ExecutorError::Configuration(format!("配置文件 {:?} 解析失败: {}", path, e));

        let mut config: Self = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            _ => {
                return Err(ExecutorError::Configuration(format!(
                    "不支持的配置文件格式: {:?}",
                    path
                )))
            }
        };

        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("PAD_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let paths = [PathBuf::from("./fStart.json"), PathBuf::from("./pad.toml")];
        for path in &paths {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".config/pad/pad.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// 按键名查询覆盖值 (`PAD_*`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(count) = lookup("PAD_WORKER_COUNT") {
            self.worker_count = count.trim().parse().map_err(|_| {
                ExecutorError::Configuration(format!("无效的 PAD_WORKER_COUNT: {}", count))
            })?;
        }
        if let Some(timeout) = lookup("PAD_TIMEOUT") {
            self.timeout_seconds = timeout.trim().parse().map_err(|_| {
                ExecutorError::Configuration(format!("无效的 PAD_TIMEOUT: {}", timeout))
            })?;
        }
        if let Some(timeout) = lookup("PAD_RUN_TIMEOUT") {
            self.run_timeout_seconds = Some(timeout.trim().parse().map_err(|_| {
                ExecutorError::Configuration(format!("无效的 PAD_RUN_TIMEOUT: {}", timeout))
            })?);
        }
        if let Some(dir) = lookup("PAD_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("PAD_WEBDRIVER_URL") {
            self.webdriver_url = url;
        }
        if let Some(url) = lookup("PAD_AI_ENDPOINT") {
            self.ai_endpoint = Some(url);
        }

        Ok(())
    }

    /// 套件文件路径 (相对路径基于配置文件所在目录)
    pub fn resolved_scenario_files(&self) -> Vec<PathBuf> {
        self.scenario_files
            .iter()
            .map(|file| match &self.base_dir {
                Some(base) if file.is_relative() => base.join(file),
                _ => file.clone(),
            })
            .collect()
    }

    /// 校验并生成引擎配置
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig::new(self.worker_count, self.timeout_seconds)?;
        match self.run_timeout_seconds {
            Some(secs) => config.with_run_timeout(secs),
            None => Ok(config),
        }
    }

    /// 内置能力提供者配置
    pub fn provider_config(&self) -> ProviderConfig {
        let request_timeout = if self.timeout_seconds > 0.0 {
            Duration::try_from_secs_f64(self.timeout_seconds).ok()
        } else {
            None
        };

        let defaults = ProviderConfig::default();
        ProviderConfig {
            webdriver_url: self.webdriver_url.clone(),
            headless: self.headless,
            request_timeout: request_timeout.unwrap_or(defaults.request_timeout),
            ai_endpoint: self
                .ai_endpoint
                .clone()
                .unwrap_or_else(|| defaults.ai_endpoint.clone()),
            ..defaults
        }
    }
}

/// 引擎配置 (启动时构建一次，之后只读)
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// 工作者数量 (>= 1)
    pub worker_count: usize,

    /// 单步默认超时
    pub step_timeout: Duration,

    /// 整体运行超时
    pub run_timeout: Option<Duration>,
}

impl EngineConfig {
    /// 校验参数；非法值报错而不是被截断
    pub fn new(worker_count: i64, timeout_seconds: f64) -> Result<Self> {
        if worker_count < 1 {
            return Err(ExecutorError::Configuration(format!(
                "worker_count 必须 >= 1, 当前为 {}",
                worker_count
            )));
        }

        Ok(Self {
            worker_count: usize::try_from(worker_count).unwrap_or(usize::MAX),
            step_timeout: positive_duration("timeout_seconds", timeout_seconds)?,
            run_timeout: None,
        })
    }

    pub fn with_run_timeout(mut self, seconds: f64) -> Result<Self> {
        self.run_timeout = Some(positive_duration("run_timeout_seconds", seconds)?);
        Ok(self)
    }
}

fn positive_duration(name: &str, seconds: f64) -> Result<Duration> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(ExecutorError::Configuration(format!(
            "{} 必须大于 0, 当前为 {}",
            name, seconds
        )));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        ExecutorError::Configuration(format!("{} 超出范围 ({}): {}", name, seconds, e))
    })
}
