//! Capabilities 命令处理

use anyhow::Result;
use serde::Serialize;

use pad_capability::CapabilityRegistry;

use super::common;
use super::output::{print_table, TableRow};

/// 已注册能力的描述
#[derive(Debug, Serialize)]
struct CapabilityInfo {
    name: String,
    kind: String,
    verbs: Vec<&'static str>,
}

impl TableRow for CapabilityInfo {
    fn headers() -> Vec<&'static str> {
        vec!["名称", "类型", "操作"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.kind.clone(), self.verbs.join(", ")]
    }
}

fn describe(registry: &CapabilityRegistry) -> Vec<CapabilityInfo> {
    registry
        .list()
        .into_iter()
        .filter_map(|name| {
            let handler = registry.resolve(&name).ok()?;
            Some(CapabilityInfo {
                kind: format!("{:?}", handler.kind()),
                verbs: handler.verbs().to_vec(),
                name,
            })
        })
        .collect()
}

pub async fn handle() -> Result<bool> {
    let config = common::load_config(None)?;
    let registry = common::build_registry(&config)?;

    print_table(&describe(&registry));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pad_capability::{builtin_registry, ProviderConfig};

    #[test]
    fn test_describe_builtin_capabilities() {
        let registry = builtin_registry(&ProviderConfig::default()).unwrap();
        let infos = describe(&registry);

        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["ai", "http", "json", "math", "ui"]);

        let math = infos.iter().find(|i| i.name == "math").unwrap();
        assert!(math.verbs.contains(&"add"));
        assert!(math.verbs.contains(&"divide"));

        let ui = infos.iter().find(|i| i.name == "ui").unwrap();
        assert!(ui.verbs.contains(&"drag_and_drop"));
        assert!(ui.verbs.contains(&"assert_less_than"));

        let ai = infos.iter().find(|i| i.name == "ai").unwrap();
        assert_eq!(ai.kind, "TextGeneration");
        assert!(ai.verbs.contains(&"text_prompt"));
    }
}
