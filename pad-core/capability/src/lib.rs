//! PAD 能力层
//!
//! 提供统一的能力抽象接口，内置 UI 自动化 (WebDriver)、HTTP 调用、
//! JSON 查询、数学运算和大模型提示词五类能力。

pub mod ai;
pub mod http;
pub mod json;
pub mod math;
pub mod registry;
pub mod traits;
pub mod ui;

pub use ai::AiCapability;
pub use http::HttpCapability;
pub use json::JsonCapability;
pub use math::MathCapability;
pub use registry::CapabilityRegistry;
pub use traits::{Capability, CapabilityKind, Session};
pub use ui::WebDriverCapability;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// 能力层错误
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("能力 {0} 不存在")]
    UnknownCapability(String),

    #[error("能力 {0} 已注册")]
    AlreadyRegistered(String),

    #[error("能力 {capability} 不支持操作: {verb}")]
    UnsupportedVerb { capability: String, verb: String },

    #[error("输入无效: {0}")]
    InvalidInput(String),

    #[error("HTTP 请求失败: {0}")]
    Http(String),

    #[error("WebDriver 错误: {0}")]
    WebDriver(String),

    #[error("JSON 错误: {0}")]
    Json(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 附带失败现场文件链接的错误
    #[error("{source} {links}")]
    WithArtifacts {
        source: Box<CapabilityError>,
        links: String,
    },
}

impl From<reqwest::Error> for CapabilityError {
    fn from(e: reqwest::Error) -> Self {
        CapabilityError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for CapabilityError {
    fn from(e: serde_json::Error) -> Self {
        CapabilityError::Json(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CapabilityError>;

/// 内置能力提供者配置
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// WebDriver 服务地址 (chromedriver / geckodriver)
    pub webdriver_url: String,

    /// 浏览器无头模式
    pub headless: bool,

    /// HTTP / WebDriver 单次请求超时
    pub request_timeout: Duration,

    /// Chat Completions 接口地址
    pub ai_endpoint: String,

    /// 默认 API Key (动作参数和 `OPENAI_API_KEY` 环境变量优先)
    pub ai_api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".to_string(),
            headless: true,
            request_timeout: Duration::from_secs(30),
            ai_endpoint: ai::DEFAULT_ENDPOINT.to_string(),
            ai_api_key: None,
        }
    }
}

/// 构建内置能力注册表
///
/// 注册 `ui`、`http`、`json`、`math`、`ai`，并为表格中常见的旧名称
/// (`xUI`、`xAPI`、`xJSON`、`xMath`、`xAI`) 注册别名。
pub fn builtin_registry(config: &ProviderConfig) -> Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();

    registry.register(
        "ui",
        Arc::new(WebDriverCapability::new(
            &config.webdriver_url,
            config.headless,
            config.request_timeout,
        )?),
    )?;
    registry.register("http", Arc::new(HttpCapability::new(config.request_timeout)?))?;
    registry.register("json", Arc::new(JsonCapability::new()))?;
    registry.register("math", Arc::new(MathCapability::new()))?;
    registry.register(
        "ai",
        Arc::new(AiCapability::new(
            &config.ai_endpoint,
            config.ai_api_key.clone(),
            config.request_timeout,
        )?),
    )?;

    registry.alias("xUI", "ui")?;
    registry.alias("xAPI", "http")?;
    registry.alias("xJSON", "json")?;
    registry.alias("xMath", "math")?;
    registry.alias("xAI", "ai")?;

    Ok(registry)
}
