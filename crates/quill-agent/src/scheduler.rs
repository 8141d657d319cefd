//! Dependency-aware task scheduling.
//!
//! A [`TaskPlan`] owns its tasks in declaration order. The [`Scheduler`] decides
//! which of them may run next and records their lifecycle; it never executes
//! anything itself (see [`crate::orchestrator::PlanRunner`]).

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use quill_core::config::SchedulerConfig;
use quill_core::error::QuillError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Tool invocation backing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTool {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<TaskTool>,
}

impl OrchestratorTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            output: None,
            error: None,
            skip_reason: None,
            tool: None,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        self.tool = Some(TaskTool {
            name: name.into(),
            arguments,
        });
        self
    }

    /// Wall time between start and completion.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// Where a pending task stands relative to its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyState {
    Ready,
    Waiting,
    Blocked { reason: String },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("cannot {action} task {task} in state {status}")]
    InvalidState {
        task: String,
        status: &'static str,
        action: &'static str,
    },

    #[error("dependency cycle through task {0}")]
    Cycle(String),
}

impl From<SchedulerError> for QuillError {
    fn from(err: SchedulerError) -> Self {
        QuillError::Scheduler(err.to_string())
    }
}

/// Declarative plan input, as read from a plan file.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSpec {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "depends_on")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub tool: Option<TaskTool>,
}

/// Ordered task arena with an id index.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPlan {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub execution_mode: ExecutionMode,
    pub status: PlanStatus,
    tasks: Vec<OrchestratorTask>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPlan {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: None,
            execution_mode,
            status: PlanStatus::Pending,
            tasks: Vec::new(),
            index: HashMap::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Build a plan from a declarative spec, rejecting duplicate ids and cycles.
    pub fn from_spec(spec: PlanSpec) -> Result<Self, SchedulerError> {
        let mut plan = Self::new(spec.execution_mode);
        plan.title = spec.title;
        for task in spec.tasks {
            let title = task.title.unwrap_or_else(|| task.id.clone());
            let mut built = OrchestratorTask::new(task.id, title).depends_on(task.dependencies);
            built.tool = task.tool;
            plan.add_task(built)?;
        }
        plan.check_acyclic()?;
        Ok(plan)
    }

    pub fn add_task(&mut self, task: OrchestratorTask) -> Result<(), SchedulerError> {
        if self.index.contains_key(&task.id) {
            return Err(SchedulerError::DuplicateTask(task.id));
        }
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
        Ok(())
    }

    pub fn tasks(&self) -> &[OrchestratorTask] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&OrchestratorTask> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut OrchestratorTask, SchedulerError> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(SchedulerError::UnknownTask(id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every task has reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn dependency_state(&self, task: &OrchestratorTask) -> DependencyState {
        let mut waiting = false;
        for dep in &task.dependencies {
            match self.task(dep).map(|d| d.status) {
                None => {
                    return DependencyState::Blocked {
                        reason: format!("dependency {dep} is not part of the plan"),
                    };
                }
                Some(TaskStatus::Completed) => {}
                Some(status @ (TaskStatus::Failed | TaskStatus::Skipped)) => {
                    return DependencyState::Blocked {
                        reason: format!("dependency {dep} {}", status.as_str()),
                    };
                }
                Some(_) => waiting = true,
            }
        }
        if waiting { DependencyState::Waiting } else { DependencyState::Ready }
    }

    fn check_acyclic(&self) -> Result<(), SchedulerError> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut marks = vec![0u8; self.tasks.len()];
        for start in 0..self.tasks.len() {
            self.visit(start, &mut marks)?;
        }
        Ok(())
    }

    fn visit(&self, i: usize, marks: &mut [u8]) -> Result<(), SchedulerError> {
        match marks[i] {
            2 => return Ok(()),
            1 => return Err(SchedulerError::Cycle(self.tasks[i].id.clone())),
            _ => {}
        }
        marks[i] = 1;
        for dep in &self.tasks[i].dependencies {
            if let Some(&j) = self.index.get(dep) {
                self.visit(j, marks)?;
            }
        }
        marks[i] = 2;
        Ok(())
    }

    fn refresh_status(&mut self) {
        if !self.is_complete() || matches!(self.status, PlanStatus::Cancelled) {
            return;
        }
        let failed = self.tasks.iter().any(|t| t.status == TaskStatus::Failed);
        self.status = if failed { PlanStatus::Failed } else { PlanStatus::Completed };
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Counts by status plus elapsed time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: u64,
    pub is_complete: bool,
}

pub struct Scheduler {
    max_concurrency: usize,
    auto_skip: bool,
    running: HashSet<String>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(max_concurrency: usize, auto_skip: bool) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            auto_skip,
            running: HashSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.max_concurrency, config.auto_skip)
    }

    /// Start from `token`, e.g. a child of a caller's token so cancelling the
    /// caller pauses the scheduler.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Token for the current run. Stale tokens stay cancelled after `resume`.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn running(&self) -> &HashSet<String> {
        &self.running
    }

    /// Pending tasks whose dependencies all completed, in declaration order.
    ///
    /// With `auto_skip`, tasks blocked by a failed or skipped dependency are
    /// marked skipped. Blocking is judged from the statuses at the start of the
    /// call, so a skip only cascades to dependents on a later poll.
    pub fn get_executable_tasks(&mut self, plan: &mut TaskPlan) -> Vec<String> {
        let mut ready = Vec::new();
        let mut blocked = Vec::new();
        for task in plan.tasks.iter().filter(|t| t.status == TaskStatus::Pending) {
            if self.running.contains(&task.id) {
                continue;
            }
            match plan.dependency_state(task) {
                DependencyState::Ready => ready.push(task.id.clone()),
                DependencyState::Blocked { reason } => blocked.push((task.id.clone(), reason)),
                DependencyState::Waiting => {}
            }
        }

        if self.auto_skip && !blocked.is_empty() {
            let now = Utc::now();
            for (id, reason) in blocked {
                if let Ok(task) = plan.task_mut(&id) {
                    debug!(task = %id, %reason, "Skipping blocked task");
                    task.status = TaskStatus::Skipped;
                    task.skip_reason = Some(reason);
                    task.completed_at = Some(now);
                    metrics::counter!("quill_plan_tasks_total", "status" => "skipped").increment(1);
                }
            }
            plan.refresh_status();
        }
        ready
    }

    /// The next tasks to dispatch, bounded by free concurrency slots.
    pub fn get_parallel_batch(&mut self, plan: &mut TaskPlan) -> Vec<String> {
        let mut ready = self.get_executable_tasks(plan);
        if self.is_paused() {
            return Vec::new();
        }
        let limit = match plan.execution_mode {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => self.max_concurrency,
        };
        ready.truncate(limit.saturating_sub(self.running.len()));
        ready
    }

    pub fn mark_task_running(&mut self, plan: &mut TaskPlan, id: &str) -> Result<(), SchedulerError> {
        let now = Utc::now();
        let task = plan.task_mut(id)?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidState {
                task: id.to_string(),
                status: task.status.as_str(),
                action: "start",
            });
        }
        task.status = TaskStatus::Running;
        task.started_at = Some(now);
        self.running.insert(id.to_string());

        if plan.started_at.is_none() {
            plan.started_at = Some(now);
        }
        if plan.status == PlanStatus::Pending {
            plan.status = PlanStatus::Running;
        }
        Ok(())
    }

    pub fn mark_task_completed(
        &mut self,
        plan: &mut TaskPlan,
        id: &str,
        output: Option<String>,
    ) -> Result<(), SchedulerError> {
        let task = plan.task_mut(id)?;
        if task.status != TaskStatus::Running {
            return Err(SchedulerError::InvalidState {
                task: id.to_string(),
                status: task.status.as_str(),
                action: "complete",
            });
        }
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.output = output;
        self.running.remove(id);
        metrics::counter!("quill_plan_tasks_total", "status" => "completed").increment(1);
        plan.refresh_status();
        Ok(())
    }

    /// Fail a pending or running task.
    pub fn mark_task_failed(
        &mut self,
        plan: &mut TaskPlan,
        id: &str,
        error: impl Into<String>,
    ) -> Result<(), SchedulerError> {
        let task = plan.task_mut(id)?;
        if task.status.is_terminal() {
            return Err(SchedulerError::InvalidState {
                task: id.to_string(),
                status: task.status.as_str(),
                action: "fail",
            });
        }
        task.status = TaskStatus::Failed;
        task.completed_at = Some(Utc::now());
        task.error = Some(error.into());
        self.running.remove(id);
        metrics::counter!("quill_plan_tasks_total", "status" => "failed").increment(1);
        plan.refresh_status();
        Ok(())
    }

    /// Count another attempt of a running task.
    pub fn record_retry(&mut self, plan: &mut TaskPlan, id: &str) -> Result<u32, SchedulerError> {
        let task = plan.task_mut(id)?;
        task.retry_count += 1;
        Ok(task.retry_count)
    }

    pub fn pause(&mut self) {
        info!("Scheduler paused");
        self.cancel.cancel();
    }

    /// Resume with a fresh token if paused.
    pub fn resume(&mut self) {
        if self.cancel.is_cancelled() {
            info!("Scheduler resumed");
            self.cancel = CancellationToken::new();
        }
    }

    pub fn stop(&mut self, plan: &mut TaskPlan) {
        info!(plan = %plan.id, running = self.running.len(), "Scheduler stopped");
        self.cancel.cancel();
        self.running.clear();
        if !plan.is_complete() {
            plan.status = PlanStatus::Cancelled;
        }
    }

    pub fn stats(&self, plan: &TaskPlan) -> PlanStats {
        let mut stats = PlanStats {
            total: plan.len(),
            is_complete: plan.is_complete(),
            ..PlanStats::default()
        };
        for task in plan.tasks() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
        }
        if let Some(started) = plan.started_at {
            let end = plan.completed_at.unwrap_or_else(Utc::now);
            stats.elapsed_ms = (end - started).num_milliseconds().max(0) as u64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(mode: ExecutionMode, tasks: &[(&str, &[&str])]) -> TaskPlan {
        let mut plan = TaskPlan::new(mode);
        for (id, deps) in tasks {
            plan.add_task(OrchestratorTask::new(*id, *id).depends_on(deps.iter().copied()))
                .unwrap();
        }
        plan
    }

    #[test]
    fn test_tasks_without_dependencies_are_immediately_executable() {
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[]), ("b", &[]), ("c", &["a"])]);
        let mut s = Scheduler::new(3, true);
        assert_eq!(s.get_executable_tasks(&mut p), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_dependency_skips_lazily_across_polls() {
        // A fails; B depends on A; C depends on B.
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let mut s = Scheduler::new(3, true);

        assert_eq!(s.get_executable_tasks(&mut p), vec!["a"]);
        s.mark_task_running(&mut p, "a").unwrap();
        s.mark_task_failed(&mut p, "a", "boom").unwrap();

        assert!(s.get_executable_tasks(&mut p).is_empty());
        assert_eq!(p.task("b").unwrap().status, TaskStatus::Skipped);
        assert_eq!(p.task("c").unwrap().status, TaskStatus::Pending);
        assert!(!p.is_complete());

        assert!(s.get_executable_tasks(&mut p).is_empty());
        let c = p.task("c").unwrap();
        assert_eq!(c.status, TaskStatus::Skipped);
        assert_eq!(c.skip_reason.as_deref(), Some("dependency b skipped"));
        assert!(p.is_complete());

        let stats = s.stats(&p);
        assert_eq!((stats.completed, stats.failed, stats.skipped), (0, 1, 2));
        assert_eq!(p.status, PlanStatus::Failed);
        assert!(p.completed_at.is_some());
    }

    #[test]
    fn test_blocked_tasks_stay_pending_without_auto_skip() {
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[]), ("b", &["a"])]);
        let mut s = Scheduler::new(3, false);
        s.mark_task_running(&mut p, "a").unwrap();
        s.mark_task_failed(&mut p, "a", "x").unwrap();
        assert!(s.get_executable_tasks(&mut p).is_empty());
        assert_eq!(p.task("b").unwrap().status, TaskStatus::Pending);
        assert!(matches!(
            p.dependency_state(p.task("b").unwrap()),
            DependencyState::Blocked { .. }
        ));
    }

    #[test]
    fn test_unknown_dependency_is_blocked() {
        let mut p = plan(ExecutionMode::Parallel, &[("a", &["ghost"])]);
        let mut s = Scheduler::new(3, true);
        assert!(s.get_executable_tasks(&mut p).is_empty());
        assert_eq!(p.task("a").unwrap().status, TaskStatus::Skipped);
    }

    #[test]
    fn test_parallel_batch_respects_concurrency_and_running_set() {
        let mut p = plan(
            ExecutionMode::Parallel,
            &[("a", &[]), ("b", &[]), ("c", &[]), ("d", &[])],
        );
        let mut s = Scheduler::new(2, true);
        let batch = s.get_parallel_batch(&mut p);
        assert_eq!(batch, vec!["a", "b"]);
        for id in &batch {
            s.mark_task_running(&mut p, id).unwrap();
        }
        assert!(s.get_parallel_batch(&mut p).is_empty());
        s.mark_task_completed(&mut p, "a", Some("ok".into())).unwrap();
        assert_eq!(s.get_parallel_batch(&mut p), vec!["c"]);
    }

    #[test]
    fn test_sequential_plan_runs_one_at_a_time() {
        let mut p = plan(ExecutionMode::Sequential, &[("a", &[]), ("b", &[])]);
        let mut s = Scheduler::new(4, true);
        assert_eq!(s.get_parallel_batch(&mut p), vec!["a"]);
        s.mark_task_running(&mut p, "a").unwrap();
        assert!(s.get_parallel_batch(&mut p).is_empty());
    }

    #[test]
    fn test_invalid_transitions_are_errors() {
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[])]);
        let mut s = Scheduler::new(1, true);
        assert!(matches!(
            s.mark_task_completed(&mut p, "a", None),
            Err(SchedulerError::InvalidState { .. })
        ));
        assert!(matches!(
            s.mark_task_running(&mut p, "zzz"),
            Err(SchedulerError::UnknownTask(_))
        ));
        s.mark_task_running(&mut p, "a").unwrap();
        s.mark_task_completed(&mut p, "a", None).unwrap();
        assert!(s.mark_task_failed(&mut p, "a", "late").is_err());
        assert!(p.task("a").unwrap().duration().is_some());
        assert_eq!(p.status, PlanStatus::Completed);
    }

    #[test]
    fn test_pause_resume_uses_fresh_token() {
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[])]);
        let mut s = Scheduler::new(1, true);
        let old = s.cancel_token();
        s.pause();
        assert!(old.is_cancelled());
        assert!(s.get_parallel_batch(&mut p).is_empty());

        s.resume();
        assert!(old.is_cancelled());
        assert!(!s.cancel_token().is_cancelled());
        assert_eq!(s.get_parallel_batch(&mut p), vec!["a"]);
    }

    #[test]
    fn test_stop_clears_running_and_cancels_plan() {
        let mut p = plan(ExecutionMode::Parallel, &[("a", &[]), ("b", &[])]);
        let mut s = Scheduler::new(2, true);
        s.mark_task_running(&mut p, "a").unwrap();
        s.stop(&mut p);
        assert!(s.running().is_empty());
        assert!(s.is_paused());
        assert_eq!(p.status, PlanStatus::Cancelled);
    }

    #[test]
    fn test_plan_spec_rejects_cycles_and_duplicates() {
        let spec: PlanSpec = serde_json::from_value(serde_json::json!({
            "execution_mode": "parallel",
            "tasks": [
                {"id": "a", "depends_on": ["b"]},
                {"id": "b", "dependencies": ["a"]}
            ]
        }))
        .unwrap();
        assert!(matches!(TaskPlan::from_spec(spec), Err(SchedulerError::Cycle(_))));

        let spec: PlanSpec = serde_json::from_value(serde_json::json!({
            "tasks": [{"id": "a"}, {"id": "a"}]
        }))
        .unwrap();
        assert!(matches!(
            TaskPlan::from_spec(spec),
            Err(SchedulerError::DuplicateTask(_))
        ));
    }

    #[test]
    fn test_plan_spec_builds_tool_tasks() {
        let spec: PlanSpec = serde_json::from_value(serde_json::json!({
            "title": "inspect",
            "tasks": [
                {"id": "tree", "tool": {"name": "get_dir_tree", "arguments": {}}},
                {"id": "read", "title": "Read manifest", "depends_on": ["tree"],
                 "tool": {"name": "read_file", "arguments": {"path": "Cargo.toml"}}}
            ]
        }))
        .unwrap();
        let plan = TaskPlan::from_spec(spec).unwrap();
        assert_eq!(plan.execution_mode, ExecutionMode::Sequential);
        assert_eq!(plan.len(), 2);
        let read = plan.task("read").unwrap();
        assert_eq!(read.title, "Read manifest");
        assert_eq!(read.tool.as_ref().unwrap().name, "read_file");
        assert_eq!(plan.task("tree").unwrap().title, "tree");
    }
}
