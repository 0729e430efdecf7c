//! UI 自动化能力 (W3C WebDriver)
//!
//! 通过 HTTP 与 WebDriver 服务 (chromedriver / geckodriver / selenium) 通信。
//! 每个 Design 持有自己的浏览器会话，会话 ID 保存在 [`Session`] 中。
//!
//! 选择器规则:
//! - `xpath=` / `css=` 前缀显式指定
//! - `id==` / `name==` / `class==` 转换为 CSS 选择器
//! - 以 `/` 或 `(` 开头视为 XPath，其他视为 CSS
//!
//! 浏览器已打开时步骤出错，会把截图、页面源码和错误信息写入会话的失败现场目录，
//! 并在错误信息后附加 `[Link to <文件名>]`。

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use pad_common::{Outcome, ResolvedAction};

use crate::{Capability, CapabilityError, CapabilityKind, Result, Session};

/// 会话中保存浏览器会话 ID 的键
pub const SESSION_ID_KEY: &str = "ui.session_id";

/// 计时器开始时间 (UNIX 毫秒)
const TIMER_STARTED_KEY: &str = "ui.timer_started_ms";

/// 最近一次 stop_timer 的耗时 (毫秒)
const TIMER_ELAPSED_KEY: &str = "ui.timer_elapsed_ms";

/// W3C 规范中的元素引用键
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const DEFAULT_WAIT_MS: u64 = 5000;

const VERBS: &[&str] = &[
    "open",
    "navigate",
    "click",
    "type",
    "get_text",
    "wait_for",
    "title",
    "current_url",
    "refresh",
    "close",
    "select_dropdown",
    "hover",
    "is_checked",
    "send_keys",
    "context_click",
    "drag_and_drop",
    "upload_file",
    "set_viewport",
    "handle_alert",
    "accept_alert",
    "dismiss_alert",
    "start_timer",
    "stop_timer",
    "assert_less_than",
];

/// 特殊按键名对应的 WebDriver 键码，未知名称按普通文本发送
fn key_code(name: &str) -> String {
    let code = match name.trim().to_uppercase().as_str() {
        "BACKSPACE" | "BACK_SPACE" => '\u{E003}',
        "TAB" => '\u{E004}',
        "RETURN" => '\u{E006}',
        "ENTER" => '\u{E007}',
        "SHIFT" => '\u{E008}',
        "CONTROL" | "CTRL" => '\u{E009}',
        "ALT" => '\u{E00A}',
        "ESCAPE" | "ESC" => '\u{E00C}',
        "SPACE" => '\u{E00D}',
        "PAGE_UP" => '\u{E00E}',
        "PAGE_DOWN" => '\u{E00F}',
        "END" => '\u{E010}',
        "HOME" => '\u{E011}',
        "ARROW_LEFT" | "LEFT" => '\u{E012}',
        "ARROW_UP" | "UP" => '\u{E013}',
        "ARROW_RIGHT" | "RIGHT" => '\u{E014}',
        "ARROW_DOWN" | "DOWN" => '\u{E015}',
        "DELETE" => '\u{E017}',
        _ => return name.to_string(),
    };
    code.to_string()
}

/// 把 `a;b` 形式的目标拆成两部分
fn split_pair<'a>(target: &'a str, verb: &str, format: &str) -> Result<(&'a str, &'a str)> {
    target
        .split_once(';')
        .map(|(a, b)| (a.trim(), b.trim()))
        .ok_or_else(|| {
            CapabilityError::InvalidInput(format!("{} 的输入应为 '{}': {}", verb, format, target))
        })
}

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// 失败现场文件名前缀: `<design>_<step>_<action>`
fn artifact_base(design_id: &str, action: &ResolvedAction) -> String {
    format!(
        "{}_{}_{}",
        file_safe(design_id),
        action.step_index,
        file_safe(&action.action_id)
    )
}

async fn write_artifact(dir: &Path, name: &str, contents: &[u8]) -> bool {
    let path = dir.join(name);
    match tokio::fs::write(&path, contents).await {
        Ok(()) => {
            debug!("已保存失败现场: {:?}", path);
            true
        }
        Err(e) => {
            warn!("无法写入失败现场 {:?}: {}", path, e);
            false
        }
    }
}

/// 元素定位策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    /// WebDriver 定位策略 ("css selector" / "xpath")
    pub using: &'static str,
    pub value: String,
}

/// 解析选择器
pub fn detect_selector(raw: &str) -> Result<Locator> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CapabilityError::InvalidInput("选择器不能为空".to_string()));
    }

    let css = |value: String| Locator {
        using: "css selector",
        value,
    };
    let xpath = |value: String| Locator {
        using: "xpath",
        value,
    };

    if let Some((kind, value)) = raw.split_once("==") {
        match kind.to_lowercase().as_str() {
            "id" => return Ok(css(format!("[id=\"{}\"]", value))),
            "name" => return Ok(css(format!("[name=\"{}\"]", value))),
            "class" => return Ok(css(format!(".{}", value))),
            "css" => return Ok(css(value.to_string())),
            "xpath" => return Ok(xpath(value.to_string())),
            _ => {}
        }
    }

    if let Some(value) = strip_prefix_ignore_case(raw, "xpath=") {
        return Ok(xpath(value.to_string()));
    }
    if let Some(value) = strip_prefix_ignore_case(raw, "css=") {
        return Ok(css(value.to_string()));
    }
    if raw.starts_with('/') || raw.starts_with('(') {
        return Ok(xpath(raw.to_string()));
    }

    Ok(css(raw.to_string()))
}

fn strip_prefix_ignore_case<'a>(raw: &'a str, prefix: &str) -> Option<&'a str> {
    let head = raw.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&raw[prefix.len()..])
    } else {
        None
    }
}

/// WebDriver UI 自动化能力
pub struct WebDriverCapability {
    client: Client,
    base_url: String,
    headless: bool,
    poll_interval: Duration,
}

impl WebDriverCapability {
    pub fn new(base_url: &str, headless: bool, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headless,
            poll_interval: Duration::from_millis(250),
        })
    }

    /// 发送 WebDriver 命令并返回 `value` 字段
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("WebDriver {} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::WebDriver(e.to_string()))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::WebDriver(format!("无效的响应: {}", e)))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let message = value.get("message").and_then(Value::as_str).unwrap_or("");
            return Err(CapabilityError::WebDriver(format!("{}: {}", error, message)));
        }
        if !status.is_success() {
            return Err(CapabilityError::WebDriver(format!("HTTP {}", status)));
        }

        Ok(value)
    }

    fn session_id(session: &Session) -> Result<String> {
        session
            .get_str(SESSION_ID_KEY)
            .map(str::to_string)
            .ok_or_else(|| CapabilityError::WebDriver("浏览器未打开".to_string()))
    }

    async fn find_element(&self, sid: &str, selector: &str) -> Result<String> {
        let locator = detect_selector(selector)?;
        let value = self
            .command(
                Method::POST,
                &format!("/session/{}/element", sid),
                Some(json!({ "using": locator.using, "value": locator.value })),
            )
            .await?;

        element_id(&value)
            .ok_or_else(|| CapabilityError::WebDriver(format!("未找到元素: {}", selector)))
    }

    async fn element_command(
        &self,
        sid: &str,
        element: &str,
        command: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let method = if body.is_some() { Method::POST } else { Method::GET };
        self.command(
            method,
            &format!("/session/{}/element/{}/{}", sid, element, command),
            body,
        )
        .await
    }

    /// 执行一组鼠标动作，完成后释放按键状态
    async fn pointer_actions(&self, sid: &str, steps: Vec<Value>) -> Result<()> {
        let actions = json!({
            "actions": [{
                "type": "pointer",
                "id": "mouse",
                "parameters": { "pointerType": "mouse" },
                "actions": steps,
            }]
        });
        self.command(
            Method::POST,
            &format!("/session/{}/actions", sid),
            Some(actions),
        )
        .await?;
        self.command(Method::DELETE, &format!("/session/{}/actions", sid), None)
            .await?;
        Ok(())
    }

    async fn screenshot(&self, sid: &str) -> Result<Vec<u8>> {
        let value = self
            .command(Method::GET, &format!("/session/{}/screenshot", sid), None)
            .await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| CapabilityError::WebDriver("截图响应不是字符串".to_string()))?;
        BASE64
            .decode(encoded)
            .map_err(|e| CapabilityError::WebDriver(format!("截图数据无效: {}", e)))
    }

    /// 保存截图、页面源码和错误信息，返回写入成功的文件名
    async fn capture_failure(
        &self,
        action: &ResolvedAction,
        session: &Session,
        sid: &str,
        message: &str,
    ) -> Vec<String> {
        let Some(dir) = session.artifact_dir() else {
            return Vec::new();
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("无法创建失败现场目录 {:?}: {}", dir, e);
            return Vec::new();
        }

        let base = artifact_base(session.design_id(), action);
        let mut files = Vec::new();

        match self.screenshot(sid).await {
            Ok(png) => {
                let name = format!("{}.png", base);
                if write_artifact(dir, &name, &png).await {
                    files.push(name);
                }
            }
            Err(e) => warn!(action = %action.action_id, "截图失败: {}", e),
        }

        match self
            .command(Method::GET, &format!("/session/{}/source", sid), None)
            .await
        {
            Ok(source) => {
                let name = format!("{}.html", base);
                let html = source.as_str().unwrap_or_default();
                if write_artifact(dir, &name, html.as_bytes()).await {
                    files.push(name);
                }
            }
            Err(e) => warn!(action = %action.action_id, "获取页面源码失败: {}", e),
        }

        let name = format!("{}_error.txt", base);
        if write_artifact(dir, &name, message.as_bytes()).await {
            files.push(name);
        }

        files
    }

    async fn open(&self, action: &ResolvedAction, session: &mut Session) -> Result<Outcome> {
        if session.get(SESSION_ID_KEY).is_some() {
            return Ok(Outcome::passed("browser already open"));
        }

        let browser = match action.target.trim() {
            "" => "chrome".to_string(),
            name => name.to_lowercase(),
        };
        let mut capabilities = json!({ "browserName": browser });
        if self.headless {
            match browser.as_str() {
                "chrome" => {
                    capabilities["goog:chromeOptions"] = json!({ "args": ["--headless=new"] })
                }
                "firefox" => capabilities["moz:firefoxOptions"] = json!({ "args": ["-headless"] }),
                _ => {}
            }
        }

        let value = self
            .command(
                Method::POST,
                "/session",
                Some(json!({ "capabilities": { "alwaysMatch": capabilities } })),
            )
            .await?;
        let sid = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::WebDriver("响应中缺少 sessionId".to_string()))?;

        info!(design = %session.design_id(), "浏览器会话已创建: {}", sid);
        session.set(SESSION_ID_KEY, Value::String(sid.to_string()));
        Ok(Outcome::passed(sid))
    }

    async fn wait_for(&self, action: &ResolvedAction, sid: &str) -> Result<Outcome> {
        let wait = action
            .param("timeout_ms")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_WAIT_MS);
        let deadline = Instant::now() + Duration::from_millis(wait);

        loop {
            match self.find_element(sid, &action.target).await {
                Ok(_) => return Ok(Outcome::passed("found")),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(_) => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// 等待弹窗出现后执行 accept / dismiss / `type:<文本>`
    async fn handle_alert(&self, action: &ResolvedAction, sid: &str, how: &str) -> Result<Outcome> {
        let wait = action
            .param("timeout_ms")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_WAIT_MS);
        let deadline = Instant::now() + Duration::from_millis(wait);
        let alert = format!("/session/{}/alert", sid);

        loop {
            match self
                .command(Method::GET, &format!("{}/text", alert), None)
                .await
            {
                Ok(_) => break,
                Err(_) if Instant::now() >= deadline => {
                    return Err(CapabilityError::WebDriver(format!(
                        "{}ms 内没有出现弹窗",
                        wait
                    )))
                }
                Err(_) => tokio::time::sleep(self.poll_interval).await,
            }
        }

        let how = how.trim();
        let lower = how.to_lowercase();
        if lower == "accept" {
            self.command(Method::POST, &format!("{}/accept", alert), Some(json!({})))
                .await?;
            Ok(Outcome::passed("Alert accepted"))
        } else if lower == "dismiss" {
            self.command(Method::POST, &format!("{}/dismiss", alert), Some(json!({})))
                .await?;
            Ok(Outcome::passed("Alert dismissed"))
        } else if lower.starts_with("type:") {
            let text = &how["type:".len()..];
            self.command(
                Method::POST,
                &format!("{}/text", alert),
                Some(json!({ "text": text })),
            )
            .await?;
            self.command(Method::POST, &format!("{}/accept", alert), Some(json!({})))
                .await?;
            Ok(Outcome::passed(format!("Typed '{}' into alert and accepted", text)))
        } else {
            Err(CapabilityError::InvalidInput(format!(
                "不支持的弹窗操作: {}",
                how
            )))
        }
    }

    async fn close(&self, session: &mut Session) -> Result<()> {
        if let Some(sid) = session.remove(SESSION_ID_KEY) {
            if let Some(sid) = sid.as_str() {
                self.command(Method::DELETE, &format!("/session/{}", sid), None)
                    .await?;
                info!(design = %session.design_id(), "浏览器会话已关闭: {}", sid);
            }
        }
        Ok(())
    }
}

impl WebDriverCapability {
    /// 需要已打开浏览器的操作
    async fn browser_verb(&self, verb: &str, action: &ResolvedAction, sid: &str) -> Result<Outcome> {
        match verb {
            "navigate" => {
                self.command(
                    Method::POST,
                    &format!("/session/{}/url", sid),
                    Some(json!({ "url": action.target.trim() })),
                )
                .await?;
                Ok(Outcome::done())
            }
            "click" => {
                let element = self.find_element(sid, &action.target).await?;
                self.element_command(sid, &element, "click", Some(json!({})))
                    .await?;
                Ok(Outcome::done())
            }
            "type" => {
                let text = required_param(action, "text")?;
                let element = self.find_element(sid, &action.target).await?;
                self.element_command(sid, &element, "value", Some(json!({ "text": text })))
                    .await?;
                Ok(Outcome::done())
            }
            "get_text" => {
                let element = self.find_element(sid, &action.target).await?;
                let value = self.element_command(sid, &element, "text", None).await?;
                Ok(Outcome::passed(value.as_str().unwrap_or_default()))
            }
            "wait_for" => self.wait_for(action, sid).await,
            "title" => {
                let value = self
                    .command(Method::GET, &format!("/session/{}/title", sid), None)
                    .await?;
                Ok(Outcome::passed(value.as_str().unwrap_or_default()))
            }
            "current_url" => {
                let value = self
                    .command(Method::GET, &format!("/session/{}/url", sid), None)
                    .await?;
                Ok(Outcome::passed(value.as_str().unwrap_or_default()))
            }
            "refresh" => {
                self.command(
                    Method::POST,
                    &format!("/session/{}/refresh", sid),
                    Some(json!({})),
                )
                .await?;
                Ok(Outcome::done())
            }
            "select_dropdown" => {
                let value = required_param(action, "value")?;
                let select = self.find_element(sid, &action.target).await?;
                let found = self
                    .element_command(
                        sid,
                        &select,
                        "element",
                        Some(json!({
                            "using": "css selector",
                            "value": format!("option[value=\"{}\"]", value.replace('"', "\\\"")),
                        })),
                    )
                    .await?;
                let option = element_id(&found)
                    .ok_or_else(|| CapabilityError::WebDriver(format!("下拉框中没有选项: {}", value)))?;
                self.element_command(sid, &option, "click", Some(json!({})))
                    .await?;
                Ok(Outcome::passed(format!("Selected '{}' from dropdown", value)))
            }
            "hover" => {
                let element = self.find_element(sid, &action.target).await?;
                self.pointer_actions(sid, vec![move_to(&element, 0)]).await?;
                Ok(Outcome::passed("Hovered over element"))
            }
            "is_checked" => {
                let element = self.find_element(sid, &action.target).await?;
                let selected = self.element_command(sid, &element, "selected", None).await?;
                let state = if selected.as_bool().unwrap_or(false) {
                    "checked"
                } else {
                    "unchecked"
                };
                Ok(Outcome::passed(state))
            }
            "send_keys" => {
                let key = required_param(action, "key")?;
                let element = self.find_element(sid, &action.target).await?;
                self.element_command(
                    sid,
                    &element,
                    "value",
                    Some(json!({ "text": key_code(key) })),
                )
                .await?;
                Ok(Outcome::passed(format!("Sent key '{}'", key)))
            }
            "context_click" => {
                let element = self.find_element(sid, &action.target).await?;
                self.pointer_actions(
                    sid,
                    vec![
                        move_to(&element, 0),
                        json!({ "type": "pointerDown", "button": 2 }),
                        json!({ "type": "pointerUp", "button": 2 }),
                    ],
                )
                .await?;
                Ok(Outcome::passed("Context click performed"))
            }
            "drag_and_drop" => {
                let to = required_param(action, "to")?;
                let source = self.find_element(sid, &action.target).await?;
                let target = self.find_element(sid, to).await?;
                self.pointer_actions(
                    sid,
                    vec![
                        move_to(&source, 0),
                        json!({ "type": "pointerDown", "button": 0 }),
                        move_to(&target, 250),
                        json!({ "type": "pointerUp", "button": 0 }),
                    ],
                )
                .await?;
                Ok(Outcome::passed("Drag and drop performed"))
            }
            "upload_file" => {
                let path = required_param(action, "path")?;
                let absolute = tokio::fs::canonicalize(path).await.map_err(|e| {
                    CapabilityError::InvalidInput(format!("文件不存在: {} ({})", path, e))
                })?;
                let element = self.find_element(sid, &action.target).await?;
                self.element_command(
                    sid,
                    &element,
                    "value",
                    Some(json!({ "text": absolute.to_string_lossy() })),
                )
                .await?;
                Ok(Outcome::passed(format!("File '{}' uploaded", path)))
            }
            "set_viewport" => {
                let (width, height) = split_pair(&action.target, verb, "width;height")?;
                let (width, height) = match (width.parse::<u32>(), height.parse::<u32>()) {
                    (Ok(w), Ok(h)) => (w, h),
                    _ => {
                        return Err(CapabilityError::InvalidInput(format!(
                            "无效的窗口尺寸: {}x{}",
                            width, height
                        )))
                    }
                };
                self.command(
                    Method::POST,
                    &format!("/session/{}/window/rect", sid),
                    Some(json!({ "width": width, "height": height })),
                )
                .await?;
                Ok(Outcome::passed(format!("Viewport set to {}x{}", width, height)))
            }
            "handle_alert" => self.handle_alert(action, sid, &action.target).await,
            "accept_alert" => self.handle_alert(action, sid, "accept").await,
            "dismiss_alert" => self.handle_alert(action, sid, "dismiss").await,
            _ => Err(CapabilityError::UnsupportedVerb {
                capability: "ui".to_string(),
                verb: action.verb.clone(),
            }),
        }
    }

    /// 不需要浏览器的计时与断言操作，其他动词返回 None
    fn timer_verb(verb: &str, action: &ResolvedAction, session: &mut Session) -> Option<Result<Outcome>> {
        let outcome = match verb {
            "start_timer" => {
                session.set(TIMER_STARTED_KEY, json!(now_ms()));
                Ok(Outcome::passed("Timer started"))
            }
            "stop_timer" => match session.get(TIMER_STARTED_KEY).and_then(Value::as_f64) {
                Some(started) => {
                    let elapsed = (now_ms() - started).max(0.0);
                    session.set(TIMER_ELAPSED_KEY, json!(elapsed));
                    info!(design = %session.design_id(), "计时结束: {:.2}ms", elapsed);
                    Ok(Outcome::passed(format!("{:.2}", elapsed)))
                }
                None => Err(CapabilityError::InvalidInput(
                    "计时器未启动，请先执行 start_timer".to_string(),
                )),
            },
            "assert_less_than" => Self::assert_less_than(action, session),
            _ => return None,
        };
        Some(outcome)
    }

    /// 目标为 `actual;threshold`，只给出阈值时与最近一次计时结果比较
    fn assert_less_than(action: &ResolvedAction, session: &Session) -> Result<Outcome> {
        let target = action.target.trim();
        let (actual, threshold) = match target.split_once(';') {
            Some((actual, threshold)) => (actual.trim().to_string(), threshold.trim()),
            None => {
                let elapsed = session
                    .get(TIMER_ELAPSED_KEY)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        CapabilityError::InvalidInput(
                            "assert_less_than 需要 'actual;threshold' 或先执行 stop_timer"
                                .to_string(),
                        )
                    })?;
                (format!("{:.2}", elapsed), target)
            }
        };

        let (a, t) = match (actual.parse::<f64>(), threshold.parse::<f64>()) {
            (Ok(a), Ok(t)) => (a, t),
            _ => {
                return Err(CapabilityError::InvalidInput(format!(
                    "无效的数值: {}, {}",
                    actual, threshold
                )))
            }
        };

        if a < t {
            Ok(Outcome::passed("Assertion passed"))
        } else {
            Ok(Outcome::failed(
                Some(actual),
                format!("断言失败: {} >= {}", a, t),
            ))
        }
    }
}

fn required_param<'a>(action: &'a ResolvedAction, key: &str) -> Result<&'a str> {
    action.param(key).ok_or_else(|| {
        CapabilityError::InvalidInput(format!("{} 需要 {} 参数", action.verb, key))
    })
}

fn element_id(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// 鼠标移动到元素中心
fn move_to(element: &str, duration_ms: u64) -> Value {
    let mut origin = serde_json::Map::new();
    origin.insert(ELEMENT_KEY.to_string(), Value::String(element.to_string()));
    json!({
        "type": "pointerMove",
        "duration": duration_ms,
        "origin": origin,
        "x": 0,
        "y": 0,
    })
}

#[async_trait]
impl Capability for WebDriverCapability {
    async fn execute(&self, action: &ResolvedAction, session: &mut Session) -> Result<Outcome> {
        let verb = action.verb.trim().to_lowercase();

        match verb.as_str() {
            "open" => return self.open(action, session).await,
            "close" => {
                self.close(session).await?;
                return Ok(Outcome::done());
            }
            _ => {}
        }
        if let Some(outcome) = Self::timer_verb(&verb, action, session) {
            return outcome;
        }

        let sid = Self::session_id(session)?;

        match self.browser_verb(&verb, action, &sid).await {
            Err(e) if !matches!(e, CapabilityError::UnsupportedVerb { .. }) => {
                let message = e.to_string();
                let files = self.capture_failure(action, session, &sid, &message).await;
                if files.is_empty() {
                    return Err(e);
                }
                let links: Vec<String> = files
                    .iter()
                    .map(|file| format!("[Link to {}]", file))
                    .collect();
                Err(CapabilityError::WithArtifacts {
                    source: Box::new(e),
                    links: links.join(" "),
                })
            }
            result => result,
        }
    }

    async fn reset(&self, session: &mut Session) -> Result<()> {
        if let Err(e) = self.close(session).await {
            // 会话 ID 已从 Session 移除，重复调用不会再次尝试
            warn!(design = %session.design_id(), "关闭浏览器会话失败: {}", e);
            return Err(e);
        }
        Ok(())
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::UiAutomation
    }

    fn verbs(&self) -> &'static [&'static str] {
        VERBS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_selector_xpath() {
        let locator = detect_selector("//button[@id='go']").unwrap();
        assert_eq!(locator.using, "xpath");
        assert_eq!(locator.value, "//button[@id='go']");

        let locator = detect_selector("(//a)[2]").unwrap();
        assert_eq!(locator.using, "xpath");

        let locator = detect_selector("xpath=//div").unwrap();
        assert_eq!(locator.using, "xpath");
        assert_eq!(locator.value, "//div");
    }

    #[test]
    fn test_detect_selector_css() {
        let locator = detect_selector("#login").unwrap();
        assert_eq!(locator.using, "css selector");
        assert_eq!(locator.value, "#login");

        let locator = detect_selector("CSS=.btn").unwrap();
        assert_eq!(locator.value, ".btn");

        let locator = detect_selector("input[type=text]").unwrap();
        assert_eq!(locator.using, "css selector");
    }

    #[test]
    fn test_detect_selector_typed() {
        assert_eq!(detect_selector("id==user").unwrap().value, "[id=\"user\"]");
        assert_eq!(detect_selector("name==q").unwrap().value, "[name=\"q\"]");
        assert_eq!(detect_selector("class==primary").unwrap().value, ".primary");
        assert_eq!(detect_selector("xpath==//p").unwrap().using, "xpath");
    }

    #[test]
    fn test_detect_selector_empty() {
        assert!(detect_selector("  ").is_err());
    }

    #[tokio::test]
    async fn test_requires_open_session() {
        let capability =
            WebDriverCapability::new("http://127.0.0.1:9", true, Duration::from_secs(1)).unwrap();
        let mut session = Session::new("D1");
        let action = ResolvedAction::new("u1", "ui", "title");
        let err = capability.execute(&action, &mut session).await.unwrap_err();
        assert!(matches!(err, CapabilityError::WebDriver(_)));
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(key_code("enter"), "\u{E007}");
        assert_eq!(key_code("Tab"), "\u{E004}");
        assert_eq!(key_code("abc"), "abc");
    }

    #[test]
    fn test_artifact_names_are_file_safe() {
        let mut action = ResolvedAction::new("log in", "ui", "click");
        action.step_index = 4;
        assert_eq!(artifact_base("D/1", &action), "D_1_4_log_in");
    }

    #[tokio::test]
    async fn test_timer_verbs_without_browser() {
        let capability =
            WebDriverCapability::new("http://127.0.0.1:9", true, Duration::from_secs(1)).unwrap();
        let mut session = Session::new("D1");

        let stop = ResolvedAction::new("t2", "ui", "stop_timer");
        assert!(matches!(
            capability.execute(&stop, &mut session).await,
            Err(CapabilityError::InvalidInput(_))
        ));

        let start = ResolvedAction::new("t1", "ui", "start_timer");
        capability.execute(&start, &mut session).await.unwrap();
        let elapsed = capability.execute(&stop, &mut session).await.unwrap();
        let elapsed: f64 = elapsed.output().unwrap().parse().unwrap();
        assert!(elapsed >= 0.0);

        // 只给阈值时与最近一次计时结果比较
        let fast = ResolvedAction::new("t3", "ui", "assert_less_than").with_target("600000");
        assert_eq!(
            capability.execute(&fast, &mut session).await.unwrap(),
            Outcome::passed("Assertion passed")
        );

        let slow = ResolvedAction::new("t4", "ui", "assert_less_than").with_target("5;3");
        let outcome = capability.execute(&slow, &mut session).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(outcome.output(), Some("5"));

        let invalid = ResolvedAction::new("t5", "ui", "assert_less_than").with_target("abc;1");
        assert!(matches!(
            capability.execute(&invalid, &mut session).await,
            Err(CapabilityError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_without_session_is_noop() {
        let capability =
            WebDriverCapability::new("http://127.0.0.1:9", true, Duration::from_secs(1)).unwrap();
        let mut session = Session::new("D1");
        capability.reset(&mut session).await.unwrap();
    }
}
