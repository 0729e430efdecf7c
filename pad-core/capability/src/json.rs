//! JSON 查询能力
//!
//! 对同一会话中最近一次 HTTP 响应的 JSON 正文做取值和比较。

use async_trait::async_trait;
use serde_json::Value;

use pad_common::{bool_text, Outcome, ResolvedAction};

use crate::http::LAST_RESPONSE_KEY;
use crate::{Capability, CapabilityError, CapabilityKind, Result, Session};

const VERBS: &[&str] = &["extract", "exists", "compare"];

/// JSON 查询能力
#[derive(Debug, Default)]
pub struct JsonCapability;

impl JsonCapability {
    pub fn new() -> Self {
        Self
    }

    fn last_response(session: &Session) -> Result<&Value> {
        session
            .get(LAST_RESPONSE_KEY)
            .ok_or_else(|| CapabilityError::Json("没有可用的 JSON 响应".to_string()))
    }
}

/// 按点分路径取值 (数字段作为数组下标)
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }

    path.split('.').try_fold(value, |current, key| match current {
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(key),
        _ => None,
    })
}

/// JSON 值转为输出文本 (字符串不带引号)
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Capability for JsonCapability {
    async fn execute(&self, action: &ResolvedAction, session: &mut Session) -> Result<Outcome> {
        let response = Self::last_response(session)?;
        let path = action.target.as_str();

        match action.verb.trim().to_lowercase().as_str() {
            "extract" => {
                let value = lookup(response, path).ok_or_else(|| {
                    CapabilityError::Json(format!("JSON 路径 '{}' 不存在", path))
                })?;
                Ok(Outcome::passed(value_to_text(value)))
            }
            "exists" | "validate" => Ok(Outcome::passed(bool_text(lookup(response, path).is_some()))),
            "compare" => {
                let expected = action.param("value").ok_or_else(|| {
                    CapabilityError::InvalidInput("compare 需要 value 参数".to_string())
                })?;
                let equal = lookup(response, path)
                    .map(|v| value_to_text(v) == expected)
                    .unwrap_or(false);
                Ok(Outcome::passed(bool_text(equal)))
            }
            _ => Err(CapabilityError::UnsupportedVerb {
                capability: "json".to_string(),
                verb: action.verb.clone(),
            }),
        }
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::JsonQuery
    }

    fn verbs(&self) -> &'static [&'static str] {
        VERBS
    }
}
