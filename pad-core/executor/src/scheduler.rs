//! 调度器 / 工作者池
//!
//! 固定数量的工作者从 FIFO 工作队列领取 Design，执行完成后把结果发回调度器。
//! 调度器把结果写入按提交序号预分配的槽位，因此最终顺序与完成顺序无关。

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pad_capability::{CapabilityRegistry, Session};
use pad_common::RunStatus;

use crate::config::EngineConfig;
use crate::runner::{PlanRunner, RunResult};
use crate::scenario::ResolvedRun;
use crate::step::ActionExecutor;

/// Design 的调度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesignState {
    Queued,
    Running,
    Completed,
}

/// 进度事件
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        index: usize,
        design_id: String,
        worker: usize,
    },
    Finished {
        index: usize,
        design_id: String,
        status: RunStatus,
    },
}

/// 进度观察者
pub type ProgressObserver = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// 一次引擎运行的全部结果 (按提交顺序)
#[derive(Debug, Clone, Serialize)]
pub struct ResultSet {
    pub runs: Vec<RunResult>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,

    /// 同时处于 Running 状态的 Design 数峰值
    pub peak_running: usize,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// 所有 Design 是否都通过
    pub fn all_passed(&self) -> bool {
        self.runs.iter().all(RunResult::passed)
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// 工作者发回调度器的消息
enum WorkerEvent {
    Started { index: usize, worker: usize },
    Finished { index: usize, result: RunResult },
}

/// 调度器
pub struct Scheduler {
    config: EngineConfig,
    registry: Arc<CapabilityRegistry>,
    observer: Option<ProgressObserver>,
    artifact_dir: Option<PathBuf>,
    started_at: Option<DateTime<Local>>,
}

impl Scheduler {
    pub fn new(registry: Arc<CapabilityRegistry>, config: EngineConfig) -> Self {
        Self {
            config,
            registry,
            observer: None,
            artifact_dir: None,
            started_at: None,
        }
    }

    /// 能力提供者保存失败现场 (截图、页面源码) 的目录
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// 固定结果集的开始时间 (报告目录按此时间命名)
    pub fn with_started_at(mut self, started_at: DateTime<Local>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    /// 设置进度观察者
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// 提交一批 Design 并等待全部完成
    ///
    /// 返回的结果集与 `runs` 一一对应且顺序一致。
    pub async fn submit(&self, runs: Vec<ResolvedRun>) -> ResultSet {
        let started_at = self.started_at.unwrap_or_else(Local::now);
        let total = runs.len();
        // 多余的工作者不会领到任务，不必启动
        let workers = self.config.worker_count.min(total);
        // 时限超出 Instant 的表示范围时视为没有时限
        let deadline = self
            .config
            .run_timeout
            .and_then(|limit| Instant::now().checked_add(limit));

        info!("提交 {} 个 Design, 工作者数量: {}", total, workers);

        let runs: Vec<Arc<ResolvedRun>> = runs.into_iter().map(Arc::new).collect();

        // 工作队列: 按提交顺序预先填充后关闭
        let (job_tx, job_rx) = async_channel::unbounded();
        for (index, run) in runs.iter().enumerate() {
            if job_tx.send((index, run.clone())).await.is_err() {
                break;
            }
        }
        job_tx.close();

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let runner = PlanRunner::new(ActionExecutor::new(
            self.registry.clone(),
            self.config.step_timeout,
        ));

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                worker,
                job_rx.clone(),
                event_tx.clone(),
                runner.clone(),
                self.registry.clone(),
                deadline,
                self.artifact_dir.clone(),
            )));
        }
        drop(job_rx);
        drop(event_tx);

        let mut slots: Vec<Option<RunResult>> = (0..total).map(|_| None).collect();
        let mut states = vec![DesignState::Queued; total];
        let mut running = 0usize;
        let mut peak_running = 0usize;

        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::Started { index, worker } => {
                    states[index] = DesignState::Running;
                    running += 1;
                    peak_running = peak_running.max(running);
                    self.notify(ProgressEvent::Started {
                        index,
                        design_id: runs[index].design_id().to_string(),
                        worker,
                    });
                }
                WorkerEvent::Finished { index, result } => {
                    if states[index] == DesignState::Running {
                        running -= 1;
                    }
                    states[index] = DesignState::Completed;
                    self.notify(ProgressEvent::Finished {
                        index,
                        design_id: result.design_id.clone(),
                        status: result.status,
                    });
                    slots[index] = Some(result);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("工作者异常退出: {}", e);
            }
        }

        let results: Vec<RunResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    warn!(design = %runs[index].design_id(), "Design 没有返回结果");
                    RunResult::errored(&runs[index], "工作者未返回结果")
                })
            })
            .collect();

        info!(
            "全部 Design 执行完成: {} 个, 峰值并发 {}",
            results.len(),
            peak_running
        );

        ResultSet {
            runs: results,
            started_at,
            finished_at: Local::now(),
            peak_running,
        }
    }

    fn notify(&self, event: ProgressEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

async fn worker_loop(
    worker: usize,
    jobs: async_channel::Receiver<(usize, Arc<ResolvedRun>)>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    runner: PlanRunner,
    registry: Arc<CapabilityRegistry>,
    deadline: Option<Instant>,
    artifact_dir: Option<PathBuf>,
) {
    debug!(worker, "工作者启动");

    while let Ok((index, run)) = jobs.recv().await {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            debug!(worker, design = %run.design_id(), "超过整体运行时限，跳过");
            let result = RunResult::skipped(&run, "超过整体运行时限");
            let _ = events.send(WorkerEvent::Finished { index, result });
            continue;
        }

        let _ = events.send(WorkerEvent::Started { index, worker });

        let mut session = Session::new(run.design_id());
        if let Some(dir) = &artifact_dir {
            session.set_artifact_dir(dir.clone());
        }
        let result = runner.run_in_session(&run, &mut session).await;
        // 工作者复用前清理能力资源 (包括超时步骤遗留的会话)
        registry.reset_session(&mut session).await;

        let _ = events.send(WorkerEvent::Finished { index, result });
    }

    debug!(worker, "工作者退出");
}
