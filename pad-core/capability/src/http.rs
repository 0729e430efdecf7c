//! HTTP 调用能力

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use pad_common::{Outcome, ResolvedAction};

use crate::{Capability, CapabilityError, CapabilityKind, Result, Session};

/// 最近一次响应的 JSON 正文
pub const LAST_RESPONSE_KEY: &str = "http.last_response";
/// 最近一次响应的状态码
pub const LAST_STATUS_KEY: &str = "http.last_status";
/// 最近一次响应的原始正文
pub const LAST_BODY_KEY: &str = "http.last_body";
/// get_auth_token 取得的令牌，之后的请求以 Bearer 方式携带
pub const AUTH_TOKEN_KEY: &str = "http.auth_token";

const SESSION_PREFIX: &str = "http.";
const HEADER_PARAM_PREFIX: &str = "header.";

const VERBS: &[&str] = &[
    "GET",
    "POST",
    "PUT",
    "PATCH",
    "DELETE",
    "HEAD",
    "get_auth_token",
];

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// HTTP 调用能力
pub struct HttpCapability {
    client: Client,
}

impl HttpCapability {
    /// 创建 HTTP 能力 (`timeout` 为单次请求超时)
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn method(verb: &str) -> Result<Method> {
        let upper = verb.trim().to_uppercase();
        if !METHODS.contains(&upper.as_str()) {
            return Err(CapabilityError::UnsupportedVerb {
                capability: "http".to_string(),
                verb: verb.to_string(),
            });
        }
        Method::from_bytes(upper.as_bytes())
            .map_err(|e| CapabilityError::InvalidInput(e.to_string()))
    }

    /// 计算请求地址: 完整 URL 直接使用，否则拼接 `base_url` 参数
    pub fn request_url(action: &ResolvedAction) -> Result<String> {
        let target = action.target.trim();

        if target.starts_with("http://") || target.starts_with("https://") {
            return Ok(target.to_string());
        }

        match action.param("base_url") {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let path = target.trim_start_matches('/');
                if path.is_empty() {
                    Ok(base.to_string())
                } else {
                    Ok(format!("{}/{}", base, path))
                }
            }
            None => Err(CapabilityError::InvalidInput(format!(
                "无效的请求地址: '{}' (需要完整 URL 或 base_url 参数)",
                target
            ))),
        }
    }

    fn headers(action: &ResolvedAction, session: &Session) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(token) = session.get_str(AUTH_TOKEN_KEY) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| CapabilityError::InvalidInput(e.to_string()))?,
            );
        }

        if let Some(api_key) = action.param("api_key") {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(
                HeaderName::from_static("api_key"),
                HeaderValue::from_str(api_key)
                    .map_err(|e| CapabilityError::InvalidInput(e.to_string()))?,
            );
        }

        for (key, value) in &action.params {
            if let Some(name) = key.strip_prefix(HEADER_PARAM_PREFIX) {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| CapabilityError::InvalidInput(e.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| CapabilityError::InvalidInput(e.to_string()))?;
                headers.insert(name, value);
            }
        }

        Ok(headers)
    }

    async fn body(action: &ResolvedAction) -> Result<Option<Value>> {
        if let Some(body) = action.param("body") {
            return Ok(Some(
                serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string())),
            ));
        }

        if let Some(path) = action.param("body_file") {
            let content = tokio::fs::read_to_string(path).await?;
            return Ok(Some(serde_json::from_str(&content)?));
        }

        Ok(None)
    }

    /// POST 认证地址 (`body` / `body_file` 为请求正文)，从响应的 `token` 字段取得令牌
    async fn get_auth_token(
        &self,
        action: &ResolvedAction,
        session: &mut Session,
    ) -> Result<Outcome> {
        let url = Self::request_url(action)?;
        info!(design = %session.design_id(), "获取认证令牌: {}", url);

        let payload = Self::body(action)
            .await?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status().as_u16();

        if status != 200 {
            warn!("获取令牌失败: HTTP {}", status);
            return Ok(Outcome::failed(
                Some("Token failed".to_string()),
                format!("获取令牌失败: HTTP {}", status),
            ));
        }

        let body: Value = response.json().await?;
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| CapabilityError::Json("响应中没有 token 字段".to_string()))?;

        session.set(AUTH_TOKEN_KEY, Value::String(token.to_string()));
        Ok(Outcome::passed("Token retrieved successfully"))
    }
}

#[async_trait]
impl Capability for HttpCapability {
    async fn execute(&self, action: &ResolvedAction, session: &mut Session) -> Result<Outcome> {
        if matches!(
            action.verb.trim().to_lowercase().as_str(),
            "get_auth_token" | "xgetauthtoken"
        ) {
            return self.get_auth_token(action, session).await;
        }

        let method = Self::method(&action.verb)?;
        let url = Self::request_url(action)?;
        info!(design = %session.design_id(), "HTTP {} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .headers(Self::headers(action, session)?);

        match Self::body(action).await? {
            Some(Value::String(text)) => request = request.body(text),
            Some(json) => request = request.json(&json),
            None => {}
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("HTTP 响应 {} ({} 字节)", status, text.len());

        session.set(LAST_STATUS_KEY, Value::from(status));
        session.set(LAST_BODY_KEY, Value::String(text.clone()));
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => session.set(LAST_RESPONSE_KEY, json),
            Err(_) => {
                session.remove(LAST_RESPONSE_KEY);
            }
        }

        let output = status.to_string();

        if let Some(expected) = action.param("expected_status") {
            if expected.trim() != output {
                return Ok(Outcome::failed(
                    Some(output.clone()),
                    format!("期望状态码 {}, 实际 {}", expected.trim(), output),
                ));
            }
        }

        Ok(Outcome::passed(output))
    }

    async fn reset(&self, session: &mut Session) -> Result<()> {
        session.clear_prefix(SESSION_PREFIX);
        Ok(())
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::HttpCall
    }

    fn verbs(&self) -> &'static [&'static str] {
        VERBS
    }
}
