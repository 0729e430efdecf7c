//! 执行引擎集成测试
//!
//! 使用桩能力验证调度、顺序、超时与失败隔离。

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pad_capability::{
    builtin_registry, Capability, CapabilityKind, CapabilityRegistry, MathCapability,
    ProviderConfig, Session,
};
use pad_common::{Outcome, ResolvedAction, RunStatus, StepStatus};
use pad_executor::{
    load_suite, Action, Aggregator, Design, EngineConfig, ExecutorError, Plan, PlanStep,
    ProgressEvent, ResolvedRun, RunConfig, ScenarioModel, ScenarioTables, Scheduler,
};

// ==========================================
// 桩能力
// ==========================================

/// 按 `ms` 参数休眠，并记录同时执行的最大数量
#[derive(Default)]
struct DelayCapability {
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Capability for DelayCapability {
    async fn execute(
        &self,
        action: &ResolvedAction,
        _session: &mut Session,
    ) -> pad_capability::Result<Outcome> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = RunningGuard(&self.running);
        self.peak.fetch_max(now, Ordering::SeqCst);

        let ms = action
            .param("ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        tokio::time::sleep(Duration::from_millis(ms)).await;

        Ok(Outcome::passed(action.target.clone()))
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Custom("delay".to_string())
    }
}

/// 模拟 HTTP: 路径以 `/broken` 结尾返回 500，其他返回 200
struct StubHttpCapability;

#[async_trait]
impl Capability for StubHttpCapability {
    async fn execute(
        &self,
        action: &ResolvedAction,
        _session: &mut Session,
    ) -> pad_capability::Result<Outcome> {
        let status = if action.target.ends_with("/broken") {
            "500"
        } else {
            "200"
        };

        match action.param("expected_status") {
            Some(expected) if expected != status => Ok(Outcome::failed(
                Some(status.to_string()),
                format!("期望状态码 {}, 实际 {}", expected, status),
            )),
            _ => Ok(Outcome::passed(status)),
        }
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::HttpCall
    }
}

struct PanicCapability;

#[async_trait]
impl Capability for PanicCapability {
    async fn execute(
        &self,
        _action: &ResolvedAction,
        _session: &mut Session,
    ) -> pad_capability::Result<Outcome> {
        panic!("driver crashed");
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Custom("panic".to_string())
    }
}

/// 记录清理次数
#[derive(Default)]
struct ResetCounter {
    resets: AtomicUsize,
}

#[async_trait]
impl Capability for ResetCounter {
    async fn execute(
        &self,
        _action: &ResolvedAction,
        _session: &mut Session,
    ) -> pad_capability::Result<Outcome> {
        Ok(Outcome::done())
    }

    async fn reset(&self, _session: &mut Session) -> pad_capability::Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Custom("counter".to_string())
    }
}

struct Fixture {
    registry: Arc<CapabilityRegistry>,
    delay: Arc<DelayCapability>,
    counter: Arc<ResetCounter>,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pad_executor=debug")
        .with_test_writer()
        .try_init();

    let delay = Arc::new(DelayCapability::default());
    let counter = Arc::new(ResetCounter::default());

    let mut registry = CapabilityRegistry::new();
    registry
        .register("math", Arc::new(MathCapability::new()))
        .unwrap();
    registry
        .register("http", Arc::new(StubHttpCapability))
        .unwrap();
    registry.register("delay", delay.clone()).unwrap();
    registry.register("panic", Arc::new(PanicCapability)).unwrap();
    registry.register("counter", counter.clone()).unwrap();

    Fixture {
        registry: Arc::new(registry),
        delay,
        counter,
    }
}

fn scheduler(fixture: &Fixture, workers: i64) -> Scheduler {
    Scheduler::new(
        fixture.registry.clone(),
        EngineConfig::new(workers, 5.0).unwrap(),
    )
}

fn sleep_step(id: &str, ms: u64) -> ResolvedAction {
    ResolvedAction::new(id, "delay", "sleep")
        .with_target(id)
        .with_param("ms", &ms.to_string())
}

// ==========================================
// 示例场景
// ==========================================

#[tokio::test]
async fn test_math_design_passes() {
    let fixture = fixture();
    let tables = ScenarioTables {
        designs: vec![Design::new("D1", &["P1"])],
        plans: vec![Plan::new("P1", vec![PlanStep::action("a1")])],
        actions: vec![Action::new("a1", "math", "add")
            .with_param("x", "2")
            .with_param("y", "3")
            .with_expected("5")],
    };

    let model = ScenarioModel::build(tables, &fixture.registry).unwrap();
    let results = scheduler(&fixture, 1)
        .submit(model.resolve_all().unwrap())
        .await;

    assert_eq!(results.len(), 1);
    let run = &results.runs[0];
    assert_eq!(run.design_id, "D1");
    assert_eq!(run.status, RunStatus::Passed);
    assert_eq!(run.steps[0].action_id, "a1");
    assert_eq!(run.steps[0].status, StepStatus::Passed);
    assert_eq!(run.steps[0].output.as_deref(), Some("5"));
}

#[tokio::test]
async fn test_http_design_with_broken_endpoint_fails() {
    let fixture = fixture();
    let tables = ScenarioTables {
        designs: vec![Design::new("D2", &["P2"])],
        plans: vec![Plan::new(
            "P2",
            vec![PlanStep::action("b1"), PlanStep::action("b2")],
        )],
        actions: vec![
            Action::new("b1", "http", "GET")
                .with_target("https://example.test/health")
                .with_param("expected_status", "200"),
            Action::new("b2", "http", "GET")
                .with_target("https://example.test/broken")
                .with_param("expected_status", "200"),
        ],
    };

    let model = ScenarioModel::build(tables, &fixture.registry).unwrap();
    let results = scheduler(&fixture, 2)
        .submit(model.resolve_all().unwrap())
        .await;

    let run = &results.runs[0];
    assert_eq!(run.steps[0].status, StepStatus::Passed);
    assert_eq!(run.steps[1].status, StepStatus::Failed);
    assert_eq!(run.steps[1].output.as_deref(), Some("500"));
    assert_eq!(run.status, RunStatus::Failed);
    assert!(!results.all_passed());
}

// ==========================================
// 调度与顺序
// ==========================================

#[tokio::test(start_paused = true)]
async fn test_result_order_independent_of_completion_order() {
    let fixture = fixture();
    let finished = Arc::new(Mutex::new(Vec::new()));
    let observed = finished.clone();

    let runs: Vec<ResolvedRun> = (0..5)
        .map(|i| {
            let id = format!("D{}", i);
            ResolvedRun::new(&id, vec![sleep_step("s1", 250 - i * 50)])
        })
        .collect();

    let results = scheduler(&fixture, 5)
        .with_observer(Arc::new(move |event: &ProgressEvent| {
            if let ProgressEvent::Finished { design_id, .. } = event {
                observed.lock().unwrap().push(design_id.clone());
            }
        }))
        .submit(runs)
        .await;

    // 完成顺序与提交顺序相反
    assert_eq!(
        *finished.lock().unwrap(),
        vec!["D4", "D3", "D2", "D1", "D0"]
    );

    let ids: Vec<&str> = results.runs.iter().map(|r| r.design_id.as_str()).collect();
    assert_eq!(ids, vec!["D0", "D1", "D2", "D3", "D4"]);
    assert!(results.all_passed());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bounded_by_worker_count() {
    let fixture = fixture();
    let runs: Vec<ResolvedRun> = (0..10)
        .map(|i| {
            ResolvedRun::new(
                &format!("D{}", i),
                vec![sleep_step("s1", 30), sleep_step("s2", 20)],
            )
        })
        .collect();

    let results = scheduler(&fixture, 2).submit(runs).await;

    assert_eq!(results.len(), 10);
    for (i, run) in results.runs.iter().enumerate() {
        assert_eq!(run.design_id, format!("D{}", i));
        assert_eq!(run.status, RunStatus::Passed);
    }
    // 10 个等长 Design 足以让两个工作者同时忙碌
    assert_eq!(fixture.delay.peak.load(Ordering::SeqCst), 2);
    assert_eq!(results.peak_running, 2);
}

/// 记录 Started 事件中的提交序号
fn start_order(scheduler: Scheduler) -> (Scheduler, Arc<Mutex<Vec<usize>>>) {
    let started = Arc::new(Mutex::new(Vec::new()));
    let observed = started.clone();
    let scheduler = scheduler.with_observer(Arc::new(move |event: &ProgressEvent| {
        if let ProgressEvent::Started { index, .. } = event {
            observed.lock().unwrap().push(*index);
        }
    }));
    (scheduler, started)
}

fn equal_runs(count: usize) -> Vec<ResolvedRun> {
    (0..count)
        .map(|i| ResolvedRun::new(&format!("D{}", i), vec![sleep_step("s1", 40)]))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_single_worker_starts_in_submission_order() {
    let fixture = fixture();
    let (scheduler, started) = start_order(scheduler(&fixture, 1));

    let results = scheduler.submit(equal_runs(6)).await;

    assert_eq!(*started.lock().unwrap(), (0..6).collect::<Vec<_>>());
    assert_eq!(results.peak_running, 1);
    assert!(results.all_passed());
}

#[tokio::test(start_paused = true)]
async fn test_two_workers_start_in_submission_order() {
    let fixture = fixture();
    let (scheduler, started) = start_order(scheduler(&fixture, 2));

    let results = scheduler.submit(equal_runs(8)).await;

    assert_eq!(*started.lock().unwrap(), (0..8).collect::<Vec<_>>());
    assert_eq!(results.peak_running, 2);
    assert!(results.all_passed());
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_limits_do_not_overflow() {
    let fixture = fixture();
    let config = EngineConfig {
        worker_count: usize::MAX,
        step_timeout: Duration::from_secs(5),
        run_timeout: Some(Duration::MAX),
    };

    let results = Scheduler::new(fixture.registry.clone(), config)
        .submit(equal_runs(3))
        .await;

    assert_eq!(results.len(), 3);
    assert!(results.all_passed());
    assert_eq!(results.peak_running, 3);
}

/// 输出会话中的失败现场目录
struct ArtifactDirCapability;

#[async_trait]
impl Capability for ArtifactDirCapability {
    async fn execute(
        &self,
        _action: &ResolvedAction,
        session: &mut Session,
    ) -> pad_capability::Result<Outcome> {
        Ok(Outcome::passed(
            session
                .artifact_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        ))
    }

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Custom("where".to_string())
    }
}

#[tokio::test]
async fn test_sessions_receive_artifact_dir_and_start_time() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register("where", Arc::new(ArtifactDirCapability))
        .unwrap();
    let started_at = chrono::Local::now() - chrono::Duration::minutes(5);

    let runs = vec![
        ResolvedRun::new("D1", vec![ResolvedAction::new("w1", "where", "dir")]),
        ResolvedRun::new("D2", vec![ResolvedAction::new("w1", "where", "dir")]),
    ];
    let results = Scheduler::new(Arc::new(registry), EngineConfig::new(2, 5.0).unwrap())
        .with_artifact_dir("/tmp/pad-artifacts")
        .with_started_at(started_at)
        .submit(runs)
        .await;

    assert_eq!(results.started_at, started_at);
    for run in &results.runs {
        assert_eq!(run.steps[0].output.as_deref(), Some("/tmp/pad-artifacts"));
    }
}

#[tokio::test]
async fn test_empty_submission() {
    let fixture = fixture();
    let results = scheduler(&fixture, 3).submit(Vec::new()).await;
    assert!(results.is_empty());
    assert!(results.all_passed());
}

#[test]
fn test_zero_workers_is_configuration_error() {
    assert!(matches!(
        EngineConfig::new(0, 5.0),
        Err(ExecutorError::Configuration(_))
    ));
    assert!(matches!(
        EngineConfig::new(-1, 5.0),
        Err(ExecutorError::Configuration(_))
    ));
}

// ==========================================
// 超时与失败隔离
// ==========================================

#[tokio::test(start_paused = true)]
async fn test_step_timeout_skips_remaining_steps() {
    let fixture = fixture();
    let mut slow = sleep_step("slow", 10_000);
    slow.timeout_ms = Some(100);

    let run = ResolvedRun::new("D1", vec![slow, sleep_step("next", 10)]);
    let results = scheduler(&fixture, 1).submit(vec![run]).await;

    let steps = &results.runs[0].steps;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].status, StepStatus::TimedOut);
    assert_eq!(steps[1].status, StepStatus::Skipped);
    assert_eq!(results.runs[0].status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_step_timeout_with_continue_on_failure() {
    let fixture = fixture();
    let mut slow = sleep_step("slow", 10_000);
    slow.timeout_ms = Some(100);
    slow.continue_on_failure = true;

    let run = ResolvedRun::new("D1", vec![slow, sleep_step("next", 10)]);
    let results = scheduler(&fixture, 1).submit(vec![run]).await;

    let steps = &results.runs[0].steps;
    assert_eq!(steps[0].status, StepStatus::TimedOut);
    assert_eq!(steps[1].status, StepStatus::Passed);
    assert_eq!(results.runs[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_panic_is_isolated() {
    let fixture = fixture();
    let runs = vec![
        ResolvedRun::new(
            "D1",
            vec![
                ResolvedAction::new("p1", "panic", "boom"),
                ResolvedAction::new("m1", "math", "add").with_target("1;1"),
            ],
        ),
        ResolvedRun::new(
            "D2",
            vec![ResolvedAction::new("m1", "math", "add")
                .with_target("1;1")
                .with_expected("2")],
        ),
    ];

    let results = scheduler(&fixture, 2).submit(runs).await;

    assert_eq!(results.runs[0].steps[0].status, StepStatus::Errored);
    assert!(results.runs[0].steps[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("driver crashed"));
    assert_eq!(results.runs[0].steps[1].status, StepStatus::Skipped);
    assert_eq!(results.runs[1].status, RunStatus::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_marks_queued_designs_skipped() {
    let fixture = fixture();
    let runs: Vec<ResolvedRun> = (0..4)
        .map(|i| ResolvedRun::new(&format!("D{}", i), vec![sleep_step("s1", 600)]))
        .collect();

    let config = EngineConfig::new(1, 5.0)
        .unwrap()
        .with_run_timeout(1.0)
        .unwrap();
    let results = Scheduler::new(fixture.registry.clone(), config)
        .submit(runs)
        .await;

    let statuses: Vec<RunStatus> = results.runs.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            RunStatus::Passed,
            RunStatus::Passed,
            RunStatus::Skipped,
            RunStatus::Skipped
        ]
    );
    assert_eq!(results.runs[3].steps[0].status, StepStatus::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_capabilities_reset_after_every_design() {
    let fixture = fixture();
    let mut slow = sleep_step("slow", 10_000);
    slow.timeout_ms = Some(50);

    let runs = vec![
        ResolvedRun::new("D1", vec![slow]),
        ResolvedRun::new("D2", vec![ResolvedAction::new("c1", "counter", "noop")]),
        ResolvedRun::new("D3", vec![]),
    ];

    let results = scheduler(&fixture, 1).submit(runs).await;

    assert_eq!(results.len(), 3);
    assert_eq!(fixture.counter.resets.load(Ordering::SeqCst), 3);
}

// ==========================================
// 加载期错误与汇总
// ==========================================

#[test]
fn test_cyclic_plans_rejected_before_execution() {
    let json = r#"{
        "designs": [{"id": "D1", "plans": ["PA"]}],
        "plans": [
            {"id": "PA", "steps": ["a1", "plan:PB"]},
            {"id": "PB", "steps": ["plan:PA"]}
        ],
        "actions": [{"id": "a1", "capability": "math", "verb": "add", "target": "1;1"}]
    }"#;
    let tables: ScenarioTables = serde_json::from_str(json).unwrap();

    let err = ScenarioModel::new(tables).err().unwrap();
    assert!(matches!(err, ExecutorError::CyclicPlan(_)));
    assert!(err.is_load_time());
}

#[tokio::test]
async fn test_summary_after_mixed_run() {
    let fixture = fixture();
    let runs = vec![
        ResolvedRun::new(
            "D1",
            vec![ResolvedAction::new("m1", "math", "add")
                .with_target("2;3")
                .with_expected("5")],
        )
        .with_expected(RunStatus::Passed),
        ResolvedRun::new(
            "D2",
            vec![
                ResolvedAction::new("m1", "math", "add")
                    .with_target("2;3")
                    .with_expected("6"),
                ResolvedAction::new("m2", "math", "add").with_target("1;1"),
            ],
        )
        .with_expected(RunStatus::Passed),
    ];

    let results = scheduler(&fixture, 2).submit(runs).await;
    let summary = Aggregator::new().publish("mixed", &results).unwrap();

    assert_eq!(summary.runs.passed, 1);
    assert_eq!(summary.runs.failed, 1);
    assert_eq!(summary.steps.passed, 1);
    assert_eq!(summary.steps.failed, 1);
    assert_eq!(summary.steps.skipped, 1);
    assert_eq!(summary.expectation_mismatches, 1);
    assert_eq!(summary.pass_rate, 50.0);
}

#[tokio::test]
async fn test_sample_suite_from_csv_tables() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios");
    let config = RunConfig::load_from_file(&root.join("pad.toml")).unwrap();
    let files = config.resolved_scenario_files();
    assert_eq!(files.len(), 2);

    let registry = Arc::new(builtin_registry(&ProviderConfig::default()).unwrap());
    let suite = load_suite(&files[0]).unwrap();
    assert_eq!(suite.name, "math");

    let model = ScenarioModel::build(suite.tables, &registry).unwrap();
    let runs = model.resolve_all().unwrap();
    let ids: Vec<&str> = runs.iter().map(|r| r.design_id()).collect();
    assert_eq!(ids, vec!["D1", "D2", "D3"]);

    let d1 = &runs[0];
    assert_eq!(d1.steps()[0].target, "2;3");
    assert_eq!(d1.steps()[1].plan_path, "P_sum/P_check");
    assert_eq!(d1.steps()[1].target, "5;0");

    let scheduler = Scheduler::new(registry, EngineConfig::new(2, 5.0).unwrap());
    let results = scheduler.submit(runs).await;
    let statuses: Vec<RunStatus> = results.runs.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![RunStatus::Passed, RunStatus::Passed, RunStatus::Failed]
    );
    assert_eq!(results.runs[2].expectation_met, Some(true));
    assert_eq!(results.runs[2].steps[0].status, StepStatus::Errored);
    assert_eq!(results.runs[2].steps[1].status, StepStatus::Skipped);

    // JSON 套件同样可以通过校验
    let api = load_suite(&files[1]).unwrap();
    let registry = builtin_registry(&ProviderConfig::default()).unwrap();
    assert_eq!(
        ScenarioModel::build(api.tables, &registry)
            .unwrap()
            .resolve_all()
            .unwrap()[0]
            .steps()[0]
            .target,
        "http://localhost:8080/health"
    );
}
