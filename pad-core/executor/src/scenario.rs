//! 场景模型
//!
//! Designs / Plans / Actions 三张关联表，以及把 Design 展开为 [`ResolvedRun`] 的解析逻辑。
//! 所有引用错误、循环引用和未绑定的占位符都在加载期报告，执行期不会再遇到。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use pad_capability::CapabilityRegistry;
use pad_common::{is_blank_cell, ResolvedAction, RunStatus};

use crate::{ExecutorError, Result};

/// 子 Plan 引用前缀
const PLAN_REF_PREFIX: &str = "plan:";

/// 参数占位符 `${name}`
const PLACEHOLDER_PATTERN: &str = r"\$\{\s*([A-Za-z0-9_.\-]+)\s*\}";

/// 一个完整的测试用例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    pub id: String,

    /// 按顺序执行的 Plan ID
    #[serde(default)]
    pub plans: Vec<String>,

    /// 用例数据 (优先级最高的参数绑定)
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    /// 期望的整体结果
    #[serde(default)]
    pub expected: Option<RunStatus>,

    /// 是否参与本次运行
    #[serde(default = "default_run")]
    pub run: bool,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_run() -> bool {
    true
}

impl Design {
    pub fn new(id: &str, plans: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            plans: plans.iter().map(|p| p.to_string()).collect(),
            inputs: BTreeMap::new(),
            expected: None,
            run: true,
            description: None,
        }
    }

    pub fn with_input(mut self, key: &str, value: &str) -> Self {
        self.inputs.insert(key.to_string(), value.to_string());
        self
    }
}

/// 可复用的步骤序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,

    #[serde(default)]
    pub steps: Vec<PlanStep>,

    /// 输入参数及其默认值
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl Plan {
    pub fn new(id: &str, steps: Vec<PlanStep>) -> Self {
        Self {
            id: id.to_string(),
            steps,
            inputs: BTreeMap::new(),
            description: None,
        }
    }

    pub fn with_input(mut self, key: &str, default: &str) -> Self {
        self.inputs.insert(key.to_string(), default.to_string());
        self
    }
}

/// Plan 中的一步: 动作引用或子 Plan 引用
///
/// 文本形式: `a1`、`plan:P2`、`plan:P2(user=bob,lang=en)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlanStep {
    Action(String),
    SubPlan {
        plan_id: String,
        inputs: BTreeMap<String, String>,
    },
}

impl PlanStep {
    pub fn action(id: &str) -> Self {
        PlanStep::Action(id.to_string())
    }

    pub fn sub_plan(plan_id: &str) -> Self {
        PlanStep::SubPlan {
            plan_id: plan_id.to_string(),
            inputs: BTreeMap::new(),
        }
    }
}

impl FromStr for PlanStep {
    type Err = ExecutorError;

    fn from_str(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ExecutorError::TableLoad("Plan 步骤不能为空".to_string()));
        }

        let is_plan_ref = raw
            .get(..PLAN_REF_PREFIX.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(PLAN_REF_PREFIX))
            .unwrap_or(false);
        if !is_plan_ref {
            return Ok(PlanStep::Action(raw.to_string()));
        }

        let rest = raw[PLAN_REF_PREFIX.len()..].trim();
        let (plan_id, inputs) = match rest.find('(') {
            Some(open) => {
                let args = rest[open + 1..].strip_suffix(')').ok_or_else(|| {
                    ExecutorError::TableLoad(format!("Plan 引用缺少右括号: {}", raw))
                })?;
                (rest[..open].trim(), parse_call_inputs(args, raw)?)
            }
            None => (rest, BTreeMap::new()),
        };

        if plan_id.is_empty() {
            return Err(ExecutorError::TableLoad(format!("Plan 引用缺少 ID: {}", raw)));
        }

        Ok(PlanStep::SubPlan {
            plan_id: plan_id.to_string(),
            inputs,
        })
    }
}

fn parse_call_inputs(args: &str, raw: &str) -> Result<BTreeMap<String, String>> {
    let mut inputs = BTreeMap::new();
    for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            ExecutorError::TableLoad(format!("Plan 调用参数格式应为 key=value: {}", raw))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ExecutorError::TableLoad(format!("Plan 调用参数名为空: {}", raw)));
        }
        inputs.insert(key.to_string(), value.trim().to_string());
    }
    Ok(inputs)
}

impl TryFrom<String> for PlanStep {
    type Error = ExecutorError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<PlanStep> for String {
    fn from(step: PlanStep) -> Self {
        step.to_string()
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Action(id) => f.write_str(id),
            PlanStep::SubPlan { plan_id, inputs } if inputs.is_empty() => {
                write!(f, "{}{}", PLAN_REF_PREFIX, plan_id)
            }
            PlanStep::SubPlan { plan_id, inputs } => {
                let args: Vec<String> = inputs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{}{}({})", PLAN_REF_PREFIX, plan_id, args.join(","))
            }
        }
    }
}

/// 单个声明式操作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub capability: String,
    pub verb: String,

    /// 目标 / 选择器 / URL
    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub expected: Option<String>,

    /// 失败后继续执行后续步骤 (失败仍计入整体结果)
    #[serde(default)]
    pub continue_on_failure: bool,

    /// 可选步骤 (失败既不中断也不计入整体结果)
    #[serde(default)]
    pub optional: bool,

    /// 单步超时 (秒)
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    #[serde(default)]
    pub description: Option<String>,
}

impl Action {
    pub fn new(id: &str, capability: &str, verb: &str) -> Self {
        Self {
            id: id.to_string(),
            capability: capability.to_string(),
            verb: verb.to_string(),
            target: String::new(),
            params: BTreeMap::new(),
            expected: None,
            continue_on_failure: false,
            optional: false,
            timeout_seconds: None,
            description: None,
        }
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_expected(mut self, expected: &str) -> Self {
        self.expected = Some(expected.to_string());
        self
    }
}

/// 三张场景表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTables {
    #[serde(default)]
    pub designs: Vec<Design>,

    #[serde(default)]
    pub plans: Vec<Plan>,

    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Design 展开后的有序动作序列 (构建后不可变)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedRun {
    design_id: String,
    description: Option<String>,
    expected: Option<RunStatus>,
    steps: Vec<ResolvedAction>,
}

impl ResolvedRun {
    /// 直接由动作序列构建 (步骤序号按位置重新编号)
    pub fn new(design_id: &str, steps: Vec<ResolvedAction>) -> Self {
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(index, mut step)| {
                step.step_index = index;
                step
            })
            .collect();

        Self {
            design_id: design_id.to_string(),
            description: None,
            expected: None,
            steps,
        }
    }

    pub fn with_expected(mut self, expected: RunStatus) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn design_id(&self) -> &str {
        &self.design_id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn expected(&self) -> Option<RunStatus> {
        self.expected
    }

    pub fn steps(&self) -> &[ResolvedAction] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 参数作用域中的一层 (一次 Plan 进入)
struct Frame {
    plan_id: String,
    bindings: BTreeMap<String, String>,
}

/// 已校验的场景模型
///
/// 构建时完成 ID 唯一性、引用完整性和循环引用检查；之后只读。
pub struct ScenarioModel {
    tables: ScenarioTables,
    plans: HashMap<String, usize>,
    actions: HashMap<String, usize>,
    placeholder: Regex,
}

impl ScenarioModel {
    /// 校验表格并构建模型
    pub fn new(tables: ScenarioTables) -> Result<Self> {
        index_ids("Design", tables.designs.iter().map(|d| d.id.as_str()))?;
        let plans = index_ids("Plan", tables.plans.iter().map(|p| p.id.as_str()))?;
        let actions = index_ids("Action", tables.actions.iter().map(|a| a.id.as_str()))?;

        let placeholder = Regex::new(PLACEHOLDER_PATTERN)
            .map_err(|e| ExecutorError::Configuration(e.to_string()))?;

        let model = Self {
            tables,
            plans,
            actions,
            placeholder,
        };

        model.check_references()?;
        model.check_cycles()?;

        info!(
            "场景模型已加载: {} 个 Design, {} 个 Plan, {} 个 Action",
            model.tables.designs.len(),
            model.tables.plans.len(),
            model.tables.actions.len()
        );

        Ok(model)
    }

    /// 构建模型并检查所有能力名称都已注册
    pub fn build(tables: ScenarioTables, registry: &CapabilityRegistry) -> Result<Self> {
        let model = Self::new(tables)?;
        model.check_capabilities(registry)?;
        Ok(model)
    }

    pub fn tables(&self) -> &ScenarioTables {
        &self.tables
    }

    /// 检查动作声明的能力是否都在注册表中
    pub fn check_capabilities(&self, registry: &CapabilityRegistry) -> Result<()> {
        for action in &self.tables.actions {
            if !registry.contains(&action.capability) {
                return Err(ExecutorError::UnknownCapability(format!(
                    "{} (Action {})",
                    action.capability, action.id
                )));
            }
        }
        Ok(())
    }

    /// 展开单个 Design
    pub fn resolve(&self, design_id: &str) -> Result<ResolvedRun> {
        let design = self
            .tables
            .designs
            .iter()
            .find(|d| d.id == design_id)
            .ok_or_else(|| {
                ExecutorError::UnresolvedReference(format!("Design {} 不存在", design_id))
            })?;

        self.resolve_design(design)
    }

    /// 按表格顺序展开所有参与运行的 Design
    pub fn resolve_all(&self) -> Result<Vec<ResolvedRun>> {
        let mut runs = Vec::new();
        for design in &self.tables.designs {
            if !design.run {
                debug!("跳过未启用的 Design: {}", design.id);
                continue;
            }
            runs.push(self.resolve_design(design)?);
        }

        info!(
            "已展开 {} 个 Design (共 {} 个)",
            runs.len(),
            self.tables.designs.len()
        );
        Ok(runs)
    }

    fn plan(&self, id: &str) -> Result<&Plan> {
        self.plans
            .get(id)
            .map(|&i| &self.tables.plans[i])
            .ok_or_else(|| ExecutorError::UnresolvedReference(format!("Plan {} 不存在", id)))
    }

    fn action(&self, id: &str) -> Result<&Action> {
        self.actions
            .get(id)
            .map(|&i| &self.tables.actions[i])
            .ok_or_else(|| ExecutorError::UnresolvedReference(format!("Action {} 不存在", id)))
    }

    fn check_references(&self) -> Result<()> {
        for design in &self.tables.designs {
            for plan_id in &design.plans {
                if !self.plans.contains_key(plan_id) {
                    return Err(ExecutorError::UnresolvedReference(format!(
                        "Design {} 引用了不存在的 Plan {}",
                        design.id, plan_id
                    )));
                }
            }
        }

        for plan in &self.tables.plans {
            for step in &plan.steps {
                let missing = match step {
                    PlanStep::Action(id) if !self.actions.contains_key(id) => {
                        Some(format!("Action {}", id))
                    }
                    PlanStep::SubPlan { plan_id, .. } if !self.plans.contains_key(plan_id) => {
                        Some(format!("Plan {}", plan_id))
                    }
                    _ => None,
                };
                if let Some(missing) = missing {
                    return Err(ExecutorError::UnresolvedReference(format!(
                        "Plan {} 引用了不存在的 {}",
                        plan.id, missing
                    )));
                }
            }
        }

        for action in &self.tables.actions {
            if let Some(secs) = action.timeout_seconds {
                if !(secs.is_finite() && secs > 0.0) {
                    return Err(ExecutorError::Configuration(format!(
                        "Action {} 的超时必须大于 0: {}",
                        action.id, secs
                    )));
                }
            }
        }

        Ok(())
    }

    /// 对每个 Plan 做深度优先遍历，路径栈上出现重复即为循环
    fn check_cycles(&self) -> Result<()> {
        let mut done = HashSet::new();
        for plan in &self.tables.plans {
            let mut path = Vec::new();
            self.visit(&plan.id, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        plan_id: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if let Some(pos) = path.iter().position(|p| *p == plan_id) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(plan_id);
            return Err(ExecutorError::CyclicPlan(cycle.join(" -> ")));
        }
        if done.contains(plan_id) {
            return Ok(());
        }

        let plan = self.plan(plan_id)?;
        path.push(plan_id);
        for step in &plan.steps {
            if let PlanStep::SubPlan { plan_id: child, .. } = step {
                self.visit(child, path, done)?;
            }
        }
        path.pop();
        done.insert(plan_id);

        Ok(())
    }

    fn resolve_design(&self, design: &Design) -> Result<ResolvedRun> {
        let mut frames = Vec::new();
        let mut steps = Vec::new();

        for plan_id in &design.plans {
            self.expand_plan(design, plan_id, &BTreeMap::new(), &mut frames, &mut steps)?;
        }

        debug!("Design {} 展开为 {} 个步骤", design.id, steps.len());

        Ok(ResolvedRun {
            design_id: design.id.clone(),
            description: design.description.clone().filter(|d| !d.trim().is_empty()),
            expected: design.expected,
            steps,
        })
    }

    fn expand_plan(
        &self,
        design: &Design,
        plan_id: &str,
        call_inputs: &BTreeMap<String, String>,
        frames: &mut Vec<Frame>,
        steps: &mut Vec<ResolvedAction>,
    ) -> Result<()> {
        let plan = self.plan(plan_id)?;

        // 默认值和调用参数都在调用方作用域中求值，调用参数覆盖默认值
        let mut bindings = BTreeMap::new();
        for (key, value) in plan.inputs.iter().chain(call_inputs.iter()) {
            let value = self.substitute(value, design, frames)?;
            bindings.insert(key.clone(), value);
        }

        frames.push(Frame {
            plan_id: plan.id.clone(),
            bindings,
        });

        for step in &plan.steps {
            match step {
                PlanStep::Action(action_id) => {
                    let action = self.action(action_id)?;
                    let resolved = self.bind_action(action, design, frames, steps.len())?;
                    steps.push(resolved);
                }
                PlanStep::SubPlan { plan_id, inputs } => {
                    self.expand_plan(design, plan_id, inputs, frames, steps)?;
                }
            }
        }

        frames.pop();
        Ok(())
    }

    fn bind_action(
        &self,
        action: &Action,
        design: &Design,
        frames: &[Frame],
        step_index: usize,
    ) -> Result<ResolvedAction> {
        let mut params = BTreeMap::new();
        for (key, value) in &action.params {
            params.insert(key.clone(), self.substitute(value, design, frames)?);
        }

        let expected = match &action.expected {
            Some(raw) => {
                let value = self.substitute(raw, design, frames)?;
                if is_blank_cell(&value) {
                    None
                } else {
                    Some(value)
                }
            }
            None => None,
        };

        let plan_path: Vec<&str> = frames.iter().map(|f| f.plan_id.as_str()).collect();

        Ok(ResolvedAction {
            step_index,
            action_id: action.id.clone(),
            plan_path: plan_path.join("/"),
            capability: action.capability.trim().to_string(),
            verb: action.verb.trim().to_string(),
            target: self.substitute(&action.target, design, frames)?,
            params,
            expected,
            continue_on_failure: action.continue_on_failure,
            optional: action.optional,
            timeout_ms: action
                .timeout_seconds
                // 不足 1 毫秒的正超时向上取整，不能变成 0
                .map(|secs| (secs * 1000.0).ceil() as u64),
            description: action
                .description
                .clone()
                .filter(|d| !d.trim().is_empty()),
        })
    }

    /// 替换 `${name}` 占位符；查找顺序为 Design 数据，然后由内到外的 Plan 作用域
    fn substitute(&self, text: &str, design: &Design, frames: &[Frame]) -> Result<String> {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;

        for caps in self.placeholder.captures_iter(text) {
            let (whole, name) = match (caps.get(0), caps.get(1)) {
                (Some(whole), Some(name)) => (whole, name.as_str()),
                _ => continue,
            };

            let value = lookup(name, design, frames).ok_or_else(|| {
                ExecutorError::UnresolvedReference(format!(
                    "Design {} 中的占位符 ${{{}}} 未绑定",
                    design.id, name
                ))
            })?;

            output.push_str(&text[last..whole.start()]);
            output.push_str(value);
            last = whole.end();
        }

        output.push_str(&text[last..]);
        Ok(output)
    }
}

fn lookup<'a>(name: &str, design: &'a Design, frames: &'a [Frame]) -> Option<&'a str> {
    design
        .inputs
        .get(name)
        .or_else(|| frames.iter().rev().find_map(|f| f.bindings.get(name)))
        .map(String::as_str)
}

fn index_ids<'a>(
    kind: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (position, id) in ids.enumerate() {
        if id.trim().is_empty() {
            return Err(ExecutorError::TableLoad(format!(
                "第 {} 个 {} 的 ID 为空",
                position + 1,
                kind
            )));
        }
        if index.insert(id.to_string(), position).is_some() {
            return Err(ExecutorError::DuplicateId(format!("{} {}", kind, id)));
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pad_capability::MathCapability;
    use std::sync::Arc;

    fn step(raw: &str) -> PlanStep {
        raw.parse().unwrap()
    }

    fn math_tables() -> ScenarioTables {
        ScenarioTables {
            designs: vec![Design::new("D1", &["P1"])],
            plans: vec![Plan::new("P1", vec![step("a1")])],
            actions: vec![Action::new("a1", "math", "add")
                .with_param("x", "2")
                .with_param("y", "3")
                .with_expected("5")],
        }
    }

    #[test]
    fn test_plan_step_parsing() {
        assert_eq!(step(" a1 "), PlanStep::action("a1"));
        assert_eq!(step("plan:P2"), PlanStep::sub_plan("P2"));
        assert_eq!(step("PLAN:P2"), PlanStep::sub_plan("P2"));

        match step("plan:P2(user=bob, lang = en)") {
            PlanStep::SubPlan { plan_id, inputs } => {
                assert_eq!(plan_id, "P2");
                assert_eq!(inputs.get("user").map(String::as_str), Some("bob"));
                assert_eq!(inputs.get("lang").map(String::as_str), Some("en"));
            }
            other => panic!("unexpected step: {:?}", other),
        }

        assert!("".parse::<PlanStep>().is_err());
        assert!("plan:".parse::<PlanStep>().is_err());
        assert!("plan:P2(user=bob".parse::<PlanStep>().is_err());
        assert!("plan:P2(user)".parse::<PlanStep>().is_err());
    }

    #[test]
    fn test_plan_step_display() {
        assert_eq!(step("plan:P2(b=2,a=1)").to_string(), "plan:P2(a=1,b=2)");
        assert_eq!(step("a1").to_string(), "a1");
    }

    #[test]
    fn test_tables_from_json() {
        let json = r#"{
            "designs": [{"id": "D1", "plans": ["P1"], "expected": "Passed"}],
            "plans": [{"id": "P1", "steps": ["a1", "plan:P2(x=1)"]}, {"id": "P2", "steps": ["a1"]}],
            "actions": [{"id": "a1", "capability": "math", "verb": "add", "target": "1;2"}]
        }"#;
        let tables: ScenarioTables = serde_json::from_str(json).unwrap();
        assert!(tables.designs[0].run);
        assert_eq!(tables.designs[0].expected, Some(RunStatus::Passed));
        assert_eq!(tables.plans[0].steps.len(), 2);

        let bad = r#"{"plans": [{"id": "P1", "steps": ["plan:(x=1)"]}]}"#;
        assert!(serde_json::from_str::<ScenarioTables>(bad).is_err());
    }

    #[test]
    fn test_resolve_simple_design() {
        let model = ScenarioModel::new(math_tables()).unwrap();
        let run = model.resolve("D1").unwrap();

        assert_eq!(run.design_id(), "D1");
        assert_eq!(run.len(), 1);
        let action = &run.steps()[0];
        assert_eq!(action.action_id, "a1");
        assert_eq!(action.plan_path, "P1");
        assert_eq!(action.param("x"), Some("2"));
        assert_eq!(action.expected.as_deref(), Some("5"));
    }

    #[test]
    fn test_nested_plans_and_bindings() {
        let tables = ScenarioTables {
            designs: vec![
                Design::new("D1", &["P1"]).with_input("host", "https://example.test"),
                Design::new("D2", &["P1"])
                    .with_input("host", "https://other.test")
                    .with_input("user", "carol"),
            ],
            plans: vec![
                Plan::new("P1", vec![step("login"), step("plan:P2(path=/users/${user})")])
                    .with_input("user", "alice"),
                Plan::new("P2", vec![step("fetch")]).with_input("path", "/"),
            ],
            actions: vec![
                Action::new("login", "http", "POST")
                    .with_target("${host}/login")
                    .with_param("body", "{\"user\": \"${user}\"}"),
                Action::new("fetch", "http", "GET").with_target("${host}${path}"),
            ],
        };
        let model = ScenarioModel::new(tables).unwrap();

        let run = model.resolve("D1").unwrap();
        assert_eq!(run.steps()[0].target, "https://example.test/login");
        assert_eq!(run.steps()[0].param("body"), Some("{\"user\": \"alice\"}"));
        assert_eq!(run.steps()[1].target, "https://example.test/users/alice");
        assert_eq!(run.steps()[1].plan_path, "P1/P2");
        assert_eq!(run.steps()[1].step_index, 1);

        // Design 数据优先于 Plan 默认值
        let run = model.resolve("D2").unwrap();
        assert_eq!(run.steps()[1].target, "https://other.test/users/carol");
    }

    #[test]
    fn test_unbound_placeholder() {
        let mut tables = math_tables();
        tables.actions[0].target = "${missing};1".to_string();
        let model = ScenarioModel::new(tables).unwrap();
        assert!(matches!(
            model.resolve("D1"),
            Err(ExecutorError::UnresolvedReference(msg)) if msg.contains("missing")
        ));
    }

    #[test]
    fn test_unknown_references() {
        let mut tables = math_tables();
        tables.designs[0].plans.push("P9".to_string());
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::UnresolvedReference(_))
        ));

        let mut tables = math_tables();
        tables.plans[0].steps.push(step("a9"));
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::UnresolvedReference(_))
        ));

        let mut tables = math_tables();
        tables.plans[0].steps.push(step("plan:P9"));
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_cycle_detected_in_unreferenced_plans() {
        let mut tables = math_tables();
        tables.plans.push(Plan::new("PA", vec![step("a1"), step("plan:PB")]));
        tables.plans.push(Plan::new("PB", vec![step("plan:PA")]));

        match ScenarioModel::new(tables) {
            Err(ExecutorError::CyclicPlan(path)) => assert_eq!(path, "PA -> PB -> PA"),
            other => panic!("expected cycle error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut tables = math_tables();
        tables.plans[0].steps.push(step("plan:P1"));
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::CyclicPlan(_))
        ));
    }

    #[test]
    fn test_shared_sub_plan_is_not_cycle() {
        let mut tables = math_tables();
        tables.plans.push(Plan::new("P2", vec![step("plan:P3"), step("plan:P3")]));
        tables.plans.push(Plan::new("P3", vec![step("a1")]));
        tables.plans[0].steps.push(step("plan:P3"));
        tables.designs[0].plans.push("P2".to_string());

        let model = ScenarioModel::new(tables).unwrap();
        let run = model.resolve("D1").unwrap();
        assert_eq!(run.len(), 4);
        let indexes: Vec<usize> = run.steps().iter().map(|s| s.step_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_duplicate_ids() {
        let mut tables = math_tables();
        tables.actions.push(Action::new("a1", "math", "add"));
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::DuplicateId(id)) if id == "Action a1"
        ));

        let mut tables = math_tables();
        tables.designs.push(Design::new("D1", &["P1"]));
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_invalid_action_timeout() {
        let mut tables = math_tables();
        tables.actions[0].timeout_seconds = Some(0.0);
        assert!(matches!(
            ScenarioModel::new(tables),
            Err(ExecutorError::Configuration(_))
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let model = ScenarioModel::new(math_tables()).unwrap();
        let first = model.resolve_all().unwrap();
        for _ in 0..5 {
            assert_eq!(model.resolve_all().unwrap(), first);
        }
        let rebuilt = ScenarioModel::new(math_tables()).unwrap();
        assert_eq!(rebuilt.resolve_all().unwrap(), first);
    }

    #[test]
    fn test_disabled_designs_are_excluded() {
        let mut tables = math_tables();
        let mut disabled = Design::new("D2", &["P1"]);
        disabled.run = false;
        tables.designs.push(disabled);
        tables.designs.push(Design::new("D3", &["P1"]));

        let runs = ScenarioModel::new(tables).unwrap().resolve_all().unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.design_id()).collect();
        assert_eq!(ids, vec!["D1", "D3"]);
    }

    #[test]
    fn test_blank_expected_and_timeout_conversion() {
        let mut tables = math_tables();
        tables.actions[0].expected = Some("nan".to_string());
        tables.actions[0].timeout_seconds = Some(1.5);
        let run = ScenarioModel::new(tables).unwrap().resolve("D1").unwrap();
        assert_eq!(run.steps()[0].expected, None);
        assert_eq!(run.steps()[0].timeout_ms, Some(1500));
    }

    #[test]
    fn test_sub_millisecond_timeout_rounds_up() {
        let mut tables = math_tables();
        tables.actions[0].timeout_seconds = Some(0.0001);
        let run = ScenarioModel::new(tables).unwrap().resolve("D1").unwrap();
        assert_eq!(run.steps()[0].timeout_ms, Some(1));

        let mut tables = math_tables();
        tables.actions[0].timeout_seconds = Some(0.0015);
        let run = ScenarioModel::new(tables).unwrap().resolve("D1").unwrap();
        assert_eq!(run.steps()[0].timeout_ms, Some(2));
    }

    #[test]
    fn test_unknown_capability() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register("math", Arc::new(MathCapability::new()))
            .unwrap();

        assert!(ScenarioModel::build(math_tables(), &registry).is_ok());

        let mut tables = math_tables();
        tables.actions[0].capability = "sap".to_string();
        let err = ScenarioModel::build(tables, &registry).err().unwrap();
        assert!(matches!(err, ExecutorError::UnknownCapability(_)));
        assert!(err.is_load_time());
    }
}
