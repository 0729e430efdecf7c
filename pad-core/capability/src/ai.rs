//! 大模型提示词能力 (OpenAI Chat Completions 兼容接口)
//!
//! 操作:
//! - `text_prompt` (`xTextPrompt`): `target` 为提示词，`@文件.txt` 读取文本，
//!   `@文件.json` 读取 `{system, prompt, model, temperature, max_tokens}`
//! - `context_prompt` (`xContextPrompt`): `params.context` 指向的文件作为 system 消息，
//!   `target` 为用户提示词
//!
//! 公共参数: `endpoint` (空或 `openai` 使用默认地址)、`api_key` (支持 `env:变量名`)、
//! `model`、`options` (`temp=0.2,max=16,model=gpt-4`)。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use pad_common::{Outcome, ResolvedAction};

use crate::{Capability, CapabilityError, CapabilityKind, Result, Session};

/// 默认 Chat Completions 地址
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// 错误信息中保留的响应正文长度
const ERROR_SNIPPET_CHARS: usize = 280;

const VERBS: &[&str] = &["text_prompt", "context_prompt"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// `@xxx.json` 形式的提示词文件
#[derive(Debug, Default, Deserialize)]
struct PromptPayload {
    system: Option<String>,
    #[serde(default)]
    prompt: String,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

/// 模型调用参数
#[derive(Debug, Clone, PartialEq)]
struct ChatSettings {
    model: String,
    temperature: f64,
    max_tokens: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

impl ChatSettings {
    /// 应用 `temp=0.7,max=500,model=gpt-4`，无法解析的项忽略
    fn apply_options(&mut self, options: &str) {
        for pair in options.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_lowercase().as_str() {
                "temp" | "temperature" => {
                    if let Ok(t) = value.parse() {
                        self.temperature = t;
                    }
                }
                "max" | "max_tokens" => {
                    if let Ok(m) = value.parse() {
                        self.max_tokens = m;
                    }
                }
                "model" if !value.is_empty() => self.model = value.to_string(),
                _ => {}
            }
        }
    }

    fn apply_action(&mut self, action: &ResolvedAction) {
        if let Some(model) = action.param("model").map(str::trim) {
            if !model.is_empty() {
                self.model = model.to_string();
            }
        }
        if let Some(options) = action.param("options") {
            self.apply_options(options);
        }
    }
}

/// 读取 `@路径` (或直接路径) 指向的文本文件
async fn read_text(path: &str) -> Result<String> {
    let path = path.trim();
    let path = path.strip_prefix('@').unwrap_or(path);
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CapabilityError::InvalidInput(format!("无法读取文件 '{}': {}", path, e)))
}

/// 大模型提示词能力
pub struct AiCapability {
    client: Client,
    endpoint: String,
    default_api_key: Option<String>,
}

impl AiCapability {
    pub fn new(endpoint: &str, default_api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            default_api_key,
        })
    }

    fn endpoint<'a>(&'a self, action: &'a ResolvedAction) -> &'a str {
        match action.param("endpoint").map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() && !endpoint.eq_ignore_ascii_case("openai") => {
                endpoint
            }
            _ => &self.endpoint,
        }
    }

    /// API Key 来源: 动作参数 (`env:变量名` 读取环境变量) > `OPENAI_API_KEY` > 配置
    fn api_key(&self, action: &ResolvedAction) -> Result<String> {
        if let Some(candidate) = action.param("api_key").map(str::trim) {
            if let Some(name) = candidate
                .get(..4)
                .filter(|head| head.eq_ignore_ascii_case("env:"))
                .map(|_| candidate[4..].trim())
            {
                if let Ok(key) = std::env::var(name) {
                    if !key.is_empty() {
                        return Ok(key);
                    }
                }
            } else if !candidate.is_empty() {
                return Ok(candidate.to_string());
            }
        }

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                return Ok(key);
            }
        }

        self.default_api_key.clone().ok_or_else(|| {
            CapabilityError::InvalidInput(format!(
                "未提供 API Key: 请设置 api_key 参数或 {} 环境变量",
                API_KEY_ENV
            ))
        })
    }

    async fn chat(
        &self,
        action: &ResolvedAction,
        settings: &ChatSettings,
        messages: &[ChatMessage],
    ) -> Result<String> {
        let api_key = self.api_key(action)?;
        let endpoint = self.endpoint(action);
        debug!(
            "调用 Chat Completions: {} (model {}, max_tokens {})",
            endpoint, settings.model, settings.max_tokens
        );

        let request = ChatRequest {
            model: &settings.model,
            messages,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        };
        let response = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text
                .chars()
                .take(ERROR_SNIPPET_CHARS)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            return Err(CapabilityError::Http(format!(
                "AI 接口错误 {}: {}",
                status.as_u16(),
                snippet
            )));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| CapabilityError::Json("AI 响应中没有 choices".to_string()))
    }

    async fn text_prompt(&self, action: &ResolvedAction) -> Result<Outcome> {
        let prompt = action.target.trim();
        if prompt.is_empty() {
            return Err(CapabilityError::InvalidInput(
                "text_prompt 需要提示词".to_string(),
            ));
        }

        let mut settings = ChatSettings::default();
        let mut system = None;
        let user = if prompt.starts_with('@') && prompt.to_lowercase().ends_with(".json") {
            let payload: PromptPayload = serde_json::from_str(&read_text(prompt).await?)?;
            if let Some(model) = payload.model {
                settings.model = model;
            }
            if let Some(t) = payload.temperature {
                settings.temperature = t;
            }
            if let Some(m) = payload.max_tokens {
                settings.max_tokens = m;
            }
            system = payload.system;
            payload.prompt
        } else if prompt.starts_with('@') {
            read_text(prompt).await?
        } else {
            prompt.to_string()
        };
        settings.apply_action(action);

        let messages = messages(system.as_deref(), &user);
        let answer = self.chat(action, &settings, &messages).await?;
        info!("AI 文本提示完成 ({} 字符)", answer.chars().count());
        Ok(Outcome::passed(answer))
    }

    async fn context_prompt(&self, action: &ResolvedAction) -> Result<Outcome> {
        let context_path = action.param("context").ok_or_else(|| {
            CapabilityError::InvalidInput("context_prompt 需要 context 参数".to_string())
        })?;
        let context = read_text(context_path).await?;

        let prompt = action.target.trim();
        let user = if prompt.starts_with('@') {
            read_text(prompt).await?
        } else {
            prompt.to_string()
        };

        let mut settings = ChatSettings::default();
        settings.apply_action(action);

        let messages = messages(Some(&context), &user);
        let answer = self.chat(action, &settings, &messages).await?;
        info!("AI 上下文提示完成 ({} 字符)", answer.chars().count());
        Ok(Outcome::passed(answer))
    }
}

fn messages(system: Option<&str>, user: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        messages.push(ChatMessage::new("system", system));
    }
    messages.push(ChatMessage::new("user", user));
    messages
}

#[async_trait]
impl Capability for AiCapability {
    async fn execute(&self, action: &ResolvedAction, session: &mut Session) -> Result<Outcome> {
        debug!(design = %session.design_id(), "AI 动作 {}", action.verb);

        match action.verb.trim().to_lowercase().as_str() {
            "text_prompt" | "xtextprompt" => self.text_prompt(action).await,
            "context_prompt" | "xcontextprompt" => self.context_prompt(action).await,
            _ => Err(CapabilityError::UnsupportedVerb {
                capability: "ai".to_string(),
                verb: action.verb.clone(),
            }),
        }
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::TextGeneration
    }

    fn verbs(&self) -> &'static [&'static str] {
        VERBS
    }
}
