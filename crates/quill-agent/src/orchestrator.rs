//! Drives a [`TaskPlan`] to completion with bounded parallelism.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quill_tools::ToolExecutor;

use crate::AgentEvent;
use crate::scheduler::{OrchestratorTask, Scheduler, TaskPlan, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { output: String },
    Failed { error: String, retryable: bool },
}

/// Executes a single task.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn run(&self, task: &OrchestratorTask, cancel: CancellationToken) -> TaskOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl TaskReport {
    fn from_task(task: &OrchestratorTask) -> Self {
        let attempts = match task.status {
            TaskStatus::Skipped | TaskStatus::Pending => 0,
            _ => task.retry_count + 1,
        };
        Self {
            task_id: task.id.clone(),
            status: task.status,
            output: task.output.clone(),
            error: task.error.clone().or_else(|| task.skip_reason.clone()),
            attempts,
        }
    }
}

pub struct PlanRunner {
    scheduler: Scheduler,
    worker: Arc<dyn TaskWorker>,
    max_retries: u32,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl PlanRunner {
    pub fn new(scheduler: Scheduler, worker: Arc<dyn TaskWorker>) -> Self {
        Self {
            scheduler,
            worker,
            max_retries: 0,
            events: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Cancelling this token pauses the run: nothing new is dispatched and
    /// `run` returns once in-flight tasks settle.
    pub fn cancel_token(&self) -> CancellationToken {
        self.scheduler.cancel_token()
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run until the plan completes or the scheduler is paused. Reports come
    /// back in the order tasks reached a terminal status.
    pub async fn run(&mut self, plan: &mut TaskPlan) -> Vec<TaskReport> {
        let mut join_set: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let mut reports = Vec::new();
        let mut reported: HashSet<String> = plan
            .tasks()
            .iter()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();

        info!(plan = %plan.id, tasks = plan.len(), "Running plan");
        loop {
            for id in self.scheduler.get_parallel_batch(plan) {
                if let Err(e) = self.scheduler.mark_task_running(plan, &id) {
                    warn!(%e, "Could not dispatch task");
                    continue;
                }
                self.spawn(&mut join_set, plan, &id);
            }
            let skipped = self.collect_skipped(plan, &mut reported, &mut reports);
            if join_set.is_empty() {
                // Skips cascade one dependency level per poll.
                if skipped > 0 {
                    continue;
                }
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (id, outcome) = match joined {
                Ok(done) => done,
                Err(join_err) => {
                    error!(error = %join_err, "Plan task panicked");
                    continue;
                }
            };

            match outcome {
                TaskOutcome::Completed { output } => {
                    if let Err(e) = self.scheduler.mark_task_completed(plan, &id, Some(output)) {
                        warn!(%e, "Dropping task result");
                        continue;
                    }
                }
                TaskOutcome::Failed { error, retryable } => {
                    let attempts = plan.task(&id).map(|t| t.retry_count).unwrap_or(0);
                    if retryable && attempts < self.max_retries && !self.scheduler.is_paused() {
                        if let Ok(n) = self.scheduler.record_retry(plan, &id) {
                            debug!(task = %id, retry = n, %error, "Retrying task");
                        }
                        self.spawn(&mut join_set, plan, &id);
                        continue;
                    }
                    if let Err(e) = self.scheduler.mark_task_failed(plan, &id, error) {
                        warn!(%e, "Dropping task failure");
                        continue;
                    }
                }
            }
            if let Some(task) = plan.task(&id) {
                self.finish(task, &mut reported, &mut reports);
            }
        }

        // A panicked worker leaves its task running with nothing in flight.
        let orphaned: Vec<String> = plan
            .tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id.clone())
            .collect();
        for id in orphaned {
            if self.scheduler.mark_task_failed(plan, &id, "task worker panicked").is_ok() {
                if let Some(task) = plan.task(&id) {
                    self.finish(task, &mut reported, &mut reports);
                }
            }
        }
        // Failures from orphans may block more tasks.
        loop {
            self.scheduler.get_executable_tasks(plan);
            if self.collect_skipped(plan, &mut reported, &mut reports) == 0 {
                break;
            }
        }

        let stats = self.scheduler.stats(plan);
        info!(
            plan = %plan.id,
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            pending = stats.pending,
            elapsed_ms = stats.elapsed_ms,
            "Plan run finished"
        );
        reports
    }

    fn spawn(&self, join_set: &mut JoinSet<(String, TaskOutcome)>, plan: &TaskPlan, id: &str) {
        let Some(task) = plan.task(id).cloned() else {
            return;
        };
        self.emit(AgentEvent::TaskStarted {
            task_id: task.id.clone(),
            title: task.title.clone(),
        });
        let worker = self.worker.clone();
        let cancel = self.scheduler.cancel_token();
        join_set.spawn(async move {
            let outcome = worker.run(&task, cancel).await;
            (task.id, outcome)
        });
    }

    fn finish(
        &self,
        task: &OrchestratorTask,
        reported: &mut HashSet<String>,
        reports: &mut Vec<TaskReport>,
    ) {
        if !reported.insert(task.id.clone()) {
            return;
        }
        let report = TaskReport::from_task(task);
        self.emit(AgentEvent::TaskFinished {
            task_id: report.task_id.clone(),
            status: report.status,
            attempts: report.attempts,
        });
        reports.push(report);
    }

    /// Report newly skipped tasks, returning how many there were.
    fn collect_skipped(
        &self,
        plan: &TaskPlan,
        reported: &mut HashSet<String>,
        reports: &mut Vec<TaskReport>,
    ) -> usize {
        let before = reports.len();
        for task in plan.tasks().iter().filter(|t| t.status == TaskStatus::Skipped) {
            self.finish(task, reported, reports);
        }
        reports.len() - before
    }
}

/// Runs tool-backed tasks through the tool executor.
///
/// A dispatched tool always runs to completion; cancellation only stops new
/// dispatches.
pub struct ToolTaskWorker {
    executor: Arc<ToolExecutor>,
    workspace: PathBuf,
}

impl ToolTaskWorker {
    pub fn new(executor: Arc<ToolExecutor>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            executor,
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl TaskWorker for ToolTaskWorker {
    async fn run(&self, task: &OrchestratorTask, _cancel: CancellationToken) -> TaskOutcome {
        let Some(tool) = &task.tool else {
            return TaskOutcome::Failed {
                error: format!("task {} has no tool to run", task.id),
                retryable: false,
            };
        };
        let result = self
            .executor
            .execute(&tool.name, &tool.arguments, &self.workspace)
            .await;
        if result.success {
            TaskOutcome::Completed {
                output: result.result,
            }
        } else {
            TaskOutcome::Failed {
                retryable: result.error_code() == Some("timeout"),
                error: result.to_model_text(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::scheduler::{ExecutionMode, PlanStatus};

    /// Scripted worker: per-task delay and a queue of outcomes.
    #[derive(Default)]
    struct ScriptedWorker {
        delays_ms: HashMap<String, u64>,
        outcomes: Mutex<HashMap<String, Vec<TaskOutcome>>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedWorker {
        fn delay(mut self, id: &str, ms: u64) -> Self {
            self.delays_ms.insert(id.into(), ms);
            self
        }

        fn outcomes(self, id: &str, outcomes: Vec<TaskOutcome>) -> Self {
            self.outcomes.lock().unwrap().insert(id.into(), outcomes);
            self
        }
    }

    #[async_trait]
    impl TaskWorker for ScriptedWorker {
        async fn run(&self, task: &OrchestratorTask, _cancel: CancellationToken) -> TaskOutcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self.delays_ms.get(&task.id).copied().unwrap_or(5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let mut outcomes = self.outcomes.lock().unwrap();
            match outcomes.get_mut(&task.id) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => TaskOutcome::Completed {
                    output: format!("{} done", task.id),
                },
            }
        }
    }

    fn plan(mode: ExecutionMode, tasks: &[(&str, &[&str])]) -> TaskPlan {
        let mut plan = TaskPlan::new(mode);
        for (id, deps) in tasks {
            plan.add_task(OrchestratorTask::new(*id, *id).depends_on(deps.iter().copied()))
                .unwrap();
        }
        plan
    }

    fn failed(error: &str, retryable: bool) -> TaskOutcome {
        TaskOutcome::Failed {
            error: error.into(),
            retryable,
        }
    }

    #[tokio::test]
    async fn test_reports_arrive_in_completion_order() {
        let worker = Arc::new(ScriptedWorker::default().delay("slow", 80).delay("fast", 5));
        let mut p = plan(
            ExecutionMode::Parallel,
            &[("slow", &[]), ("fast", &[]), ("after", &["fast"])],
        );
        let mut runner = PlanRunner::new(Scheduler::new(3, true), worker);
        let reports = runner.run(&mut p).await;

        let order: Vec<&str> = reports.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(order, vec!["fast", "after", "slow"]);
        assert_eq!(p.status, PlanStatus::Completed);
        assert_eq!(p.task("after").unwrap().output.as_deref(), Some("after done"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let worker = Arc::new(ScriptedWorker::default());
        let mut p = TaskPlan::new(ExecutionMode::Parallel);
        for i in 0..6 {
            let id = format!("t{i}");
            p.add_task(OrchestratorTask::new(&id, &id)).unwrap();
        }
        let mut runner = PlanRunner::new(Scheduler::new(2, true), worker.clone());
        let reports = runner.run(&mut p).await;

        assert_eq!(reports.len(), 6);
        assert!(worker.peak.load(Ordering::SeqCst) <= 2);
        assert!(p.is_complete());
    }

    #[tokio::test]
    async fn test_failure_skips_dependents() {
        let worker = Arc::new(ScriptedWorker::default().outcomes("a", vec![failed("boom", false)]));
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = PlanRunner::new(Scheduler::new(3, true), worker).with_events(tx);
        let reports = runner.run(&mut p).await;

        let statuses: Vec<TaskStatus> = reports.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Failed, TaskStatus::Skipped, TaskStatus::Skipped]
        );
        let stats = runner.scheduler().stats(&p);
        assert_eq!((stats.completed, stats.failed, stats.skipped), (0, 1, 2));
        assert_eq!(p.status, PlanStatus::Failed);

        let mut started = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AgentEvent::TaskStarted { .. }) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let worker = Arc::new(
            ScriptedWorker::default().outcomes("flaky", vec![failed("t1", true), failed("t2", true)]),
        );
        let mut p = plan(ExecutionMode::Sequential, &[("flaky", &[])]);
        let mut runner = PlanRunner::new(Scheduler::new(1, true), worker).with_max_retries(2);
        let reports = runner.run(&mut p).await;

        assert_eq!(reports[0].status, TaskStatus::Completed);
        assert_eq!(reports[0].attempts, 3);
        assert_eq!(p.task("flaky").unwrap().retry_count, 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let worker = Arc::new(ScriptedWorker::default().outcomes(
            "flaky",
            vec![failed("t1", true), failed("t2", true), failed("t3", true)],
        ));
        let mut p = plan(ExecutionMode::Sequential, &[("flaky", &[])]);
        let mut runner = PlanRunner::new(Scheduler::new(1, true), worker).with_max_retries(1);
        let reports = runner.run(&mut p).await;

        assert_eq!(reports[0].status, TaskStatus::Failed);
        assert_eq!(reports[0].error.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn test_paused_runner_dispatches_nothing() {
        let worker = Arc::new(ScriptedWorker::default());
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[])]);
        let mut runner = PlanRunner::new(Scheduler::new(1, true), worker);
        runner.cancel_token().cancel();
        assert!(runner.run(&mut p).await.is_empty());
        assert_eq!(p.task("a").unwrap().status, TaskStatus::Pending);

        runner.scheduler_mut().resume();
        let reports = runner.run(&mut p).await;
        assert_eq!(reports.len(), 1);
        assert!(p.is_complete());
    }

    #[tokio::test]
    async fn test_tool_task_worker_runs_tools() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();

        let worker = ToolTaskWorker::new(Arc::new(ToolExecutor::default()), dir.path());
        let task = OrchestratorTask::new("read", "Read notes")
            .with_tool("read_file", json!({"path": "notes.txt"}));
        let outcome = worker.run(&task, CancellationToken::new()).await;
        assert!(matches!(outcome, TaskOutcome::Completed { ref output } if output.contains("beta")));

        let missing = OrchestratorTask::new("gone", "Read missing")
            .with_tool("read_file", json!({"path": "nope.txt"}));
        let outcome = worker.run(&missing, CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed { ref error, retryable: false } if error.starts_with("Error [not_found]")
        ));

        let bare = OrchestratorTask::new("bare", "No tool");
        assert!(matches!(
            worker.run(&bare, CancellationToken::new()).await,
            TaskOutcome::Failed { .. }
        ));
    }
}
