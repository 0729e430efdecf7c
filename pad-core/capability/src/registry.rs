//! 能力注册表

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{Capability, CapabilityError, Result, Session};

/// 能力注册表
///
/// 启动时一次性填充，之后通过 `Arc` 只读共享给所有工作者，查找无需加锁。
/// 名称不区分大小写。
pub struct CapabilityRegistry {
    /// 能力名称 -> 处理器
    handlers: HashMap<String, Arc<dyn Capability>>,

    /// 别名 -> 能力名称
    aliases: HashMap<String, String>,
}

impl CapabilityRegistry {
    /// 创建空的能力注册表
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// 注册能力
    pub fn register(&mut self, name: &str, handler: Arc<dyn Capability>) -> Result<()> {
        let key = normalize(name);
        info!("注册能力: {}", key);

        if self.handlers.contains_key(&key) || self.aliases.contains_key(&key) {
            return Err(CapabilityError::AlreadyRegistered(key));
        }

        self.handlers.insert(key, handler);
        Ok(())
    }

    /// 为已注册的能力添加别名
    pub fn alias(&mut self, alias: &str, target: &str) -> Result<()> {
        let alias = normalize(alias);
        let target = normalize(target);

        if !self.handlers.contains_key(&target) {
            return Err(CapabilityError::UnknownCapability(target));
        }
        if self.handlers.contains_key(&alias) || self.aliases.contains_key(&alias) {
            return Err(CapabilityError::AlreadyRegistered(alias));
        }

        debug!("能力别名: {} -> {}", alias, target);
        self.aliases.insert(alias, target);
        Ok(())
    }

    /// 查找能力处理器
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>> {
        let key = self.canonical(name);

        self.handlers
            .get(&key)
            .cloned()
            .ok_or_else(|| CapabilityError::UnknownCapability(name.to_string()))
    }

    /// 检查能力是否已注册 (包括别名)
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&self.canonical(name))
    }

    /// 列出所有已注册的能力 (按名称排序)
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// 对会话调用所有能力的清理钩子
    ///
    /// 在 Design 运行结束后、工作者被复用之前调用。单个能力清理失败只记录警告。
    pub async fn reset_session(&self, session: &mut Session) {
        for name in self.list() {
            if let Some(handler) = self.handlers.get(&name) {
                if let Err(e) = handler.reset(session).await {
                    warn!(
                        design = %session.design_id(),
                        "能力 {} 清理失败: {}", name, e
                    );
                }
            }
        }
    }

    fn canonical(&self, name: &str) -> String {
        let key = normalize(name);
        self.aliases.get(&key).cloned().unwrap_or(key)
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
