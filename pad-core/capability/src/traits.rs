//! 能力抽象接口

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use pad_common::{Outcome, ResolvedAction};

use crate::Result;

/// 能力类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// 浏览器 UI 自动化
    UiAutomation,

    /// HTTP 接口调用
    HttpCall,

    /// JSON 响应查询
    JsonQuery,

    /// 数学运算
    MathEval,

    /// 大模型文本生成 (Chat Completions)
    TextGeneration,

    /// 自定义能力
    Custom(String),
}

/// 单个 Design 运行期间的会话状态
///
/// 同一 Design 内的步骤顺序执行，后续步骤可以读取前面步骤留下的状态
/// (浏览器会话、最近一次 HTTP 响应等)。不同 Design 之间不共享会话。
#[derive(Debug, Default)]
pub struct Session {
    design_id: String,
    values: HashMap<String, Value>,
    artifact_dir: Option<PathBuf>,
}

impl Session {
    pub fn new(design_id: &str) -> Self {
        Self {
            design_id: design_id.to_string(),
            values: HashMap::new(),
            artifact_dir: None,
        }
    }

    /// 失败现场文件的保存目录，未设置时不保存
    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }

    pub fn set_artifact_dir(&mut self, dir: PathBuf) {
        self.artifact_dir = Some(dir);
    }

    pub fn design_id(&self) -> &str {
        &self.design_id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// 获取字符串值
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// 删除指定前缀的所有键
    pub fn clear_prefix(&mut self, prefix: &str) {
        self.values.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 能力 trait
///
/// 所有能力提供者必须实现此 trait。`execute` 可能在超时后被放弃 (future 被丢弃)，
/// 实现必须能承受这种取消；残留资源由 `reset` 负责清理，且 `reset` 必须幂等。
#[async_trait]
pub trait Capability: Send + Sync {
    /// 执行一个动作
    async fn execute(&self, action: &ResolvedAction, session: &mut Session) -> Result<Outcome>;

    /// 清理会话中属于本能力的资源
    async fn reset(&self, _session: &mut Session) -> Result<()> {
        Ok(())
    }

    /// 获取能力类型
    fn kind(&self) -> CapabilityKind;

    /// 支持的操作动词 (用于展示)
    fn verbs(&self) -> &'static [&'static str] {
        &[]
    }

    /// 获取能力名称
    fn name(&self) -> String {
        match self.kind() {
            CapabilityKind::UiAutomation => "ui".to_string(),
            CapabilityKind::HttpCall => "http".to_string(),
            CapabilityKind::JsonQuery => "json".to_string(),
            CapabilityKind::MathEval => "math".to_string(),
            CapabilityKind::TextGeneration => "ai".to_string(),
            CapabilityKind::Custom(name) => name,
        }
    }
}
