pub mod retry;
pub mod stage;

use std::collections::{BTreeSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

pub use retry::{call_with_timeout, RetryPolicy};
pub use stage::StageArea;

use crate::capability::{Capabilities, CapabilityError, CapabilityResult, Content, MergeInput};
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::inventory::{GroupId, ItemId, ItemRef};
use crate::plan::{ActionKind, Batch, Plan, Task};
use crate::progress::ProgressReporter;
use crate::state::{ExecutionState, GroupStatus, StateTracker, TaskMark};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Groups processed at the same time.
    pub group_concurrency: usize,
    /// Tasks of one group's open batch processed at the same time.
    pub task_concurrency: usize,
    pub task_timeout: Duration,
    pub group_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        ExecutorConfig::default().settings()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Output staged at this path.
    Success(PathBuf),
    /// A transient error that outlasted every retry.
    RetryableFailure(CapabilityError),
    FatalFailure(CapabilityError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task: ItemRef,
    pub attempts: u32,
    pub outcome: TaskOutcome,
}

impl TaskResult {
    pub fn error(&self) -> Option<&CapabilityError> {
        match &self.outcome {
            TaskOutcome::Success(_) => None,
            TaskOutcome::RetryableFailure(e) | TaskOutcome::FatalFailure(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    Completed { group: GroupId, batches: usize },
    Failed { group: GroupId, reason: String },
    /// Already COMPLETED for this plan hash.
    Skipped { group: GroupId },
}

impl GroupOutcome {
    pub fn group(&self) -> &GroupId {
        match self {
            GroupOutcome::Completed { group, .. }
            | GroupOutcome::Failed { group, .. }
            | GroupOutcome::Skipped { group } => group,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, GroupOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, GroupOutcome::Failed { .. })
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<GroupOutcome>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    pub fn outcome(&self, group: &GroupId) -> Option<&GroupOutcome> {
        self.outcomes.iter().find(|o| o.group() == group)
    }
}

/// Runs plans on a two-level pool: up to `group_concurrency` worker threads
/// pull groups from a shared queue, and each active group owns a rayon pool of
/// `task_concurrency` threads for the tasks of its open batch.
pub struct Executor {
    settings: ExecutorSettings,
    capabilities: Capabilities,
    tracker: StateTracker,
    stage_root: PathBuf,
    events: EventSink,
}

impl Executor {
    pub fn new(
        settings: ExecutorSettings,
        capabilities: Capabilities,
        tracker: StateTracker,
        stage_root: PathBuf,
    ) -> Self {
        Self {
            settings,
            capabilities,
            tracker,
            stage_root,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute `plans`. Group and task failures end up in the summary; only a
    /// state persistence error stops the run, after in-flight groups finish.
    pub fn run(&self, plans: Vec<Plan>, reporter: &dyn ProgressReporter) -> Result<RunSummary> {
        let start = Instant::now();
        let workers = self.settings.group_concurrency.max(1).min(plans.len());
        info!(
            "Running {} group(s) with {} worker(s), {} task(s) per group",
            plans.len(),
            workers,
            self.settings.task_concurrency
        );
        reporter.on_run_start(plans.len());

        let queue = Mutex::new(VecDeque::from(plans));
        let outcomes = Mutex::new(Vec::new());
        let fatal: Mutex<Option<Error>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker in 0..workers {
                let spawned = thread::Builder::new()
                    .name(format!("collate-group-{worker}"))
                    .spawn_scoped(scope, || loop {
                        if lock(&fatal).is_some() {
                            break;
                        }
                        let Some(plan) = lock(&queue).pop_front() else {
                            break;
                        };
                        match self.run_group_isolated(&plan, reporter) {
                            Ok(outcome) => {
                                reporter.on_group_complete(plan.group_id.as_str(), outcome.is_completed());
                                lock(&outcomes).push(outcome);
                            }
                            Err(e) => {
                                error!("State persistence failed for '{}': {}", plan.group_id, e);
                                lock(&fatal).get_or_insert(e);
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    error!("Could not start group worker {}: {}", worker, e);
                    lock(&fatal).get_or_insert(Error::Io(e));
                    break;
                }
            }
        });

        if let Some(e) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(e);
        }

        let mut outcomes = outcomes.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcomes.sort_by(|a, b| a.group().cmp(b.group()));
        let summary = RunSummary {
            outcomes,
            duration: start.elapsed(),
        };
        reporter.on_run_complete(
            summary.completed(),
            summary.failed(),
            summary.duration.as_secs_f64(),
        );
        Ok(summary)
    }

    /// A panic anywhere in the group marks that group FAILED and goes no further.
    fn run_group_isolated(&self, plan: &Plan, reporter: &dyn ProgressReporter) -> Result<GroupOutcome> {
        let _span = info_span!("group", id = %plan.group_id).entered();
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_group(plan, reporter))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = format!("panic: {}", retry::panic_message(payload.as_ref()));
                error!("Group '{}' panicked: {}", plan.group_id, reason);
                self.fail(&plan.group_id, reason)
            }
        }
    }

    fn fail(&self, group: &GroupId, reason: String) -> Result<GroupOutcome> {
        warn!("Group '{}' failed: {}", group, reason);
        self.tracker.mark_failed(group, &reason)?;
        self.events.emit(Event::GroupFailed {
            group: group.clone(),
            reason: reason.clone(),
        });
        Ok(GroupOutcome::Failed {
            group: group.clone(),
            reason,
        })
    }

    fn run_group(&self, plan: &Plan, reporter: &dyn ProgressReporter) -> Result<GroupOutcome> {
        let group = &plan.group_id;
        let current = self.tracker.state(group)?;
        if current.status == GroupStatus::Completed && current.plan_hash.as_deref() == Some(&plan.hash) {
            debug!("Group '{}' already completed for this plan", group);
            return Ok(GroupOutcome::Skipped { group: group.clone() });
        }

        let state = self.tracker.mark_started(group, &plan.hash)?;
        let deadline = Instant::now() + self.settings.group_timeout;
        let stage = StageArea::new(&self.stage_root, group);
        info!(
            "Processing '{}': {} tasks in {} batches (retry {})",
            group,
            plan.task_count(),
            plan.batches.len(),
            state.retry_count
        );
        reporter.on_group_start(group.as_str(), plan.task_count());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.task_concurrency)
            .thread_name(|i| format!("collate-task-{i}"))
            .build()?;

        let mut progress = GroupProgress {
            reporter,
            group,
            done: state.succeeded_tasks().min(plan.task_count()),
            total: plan.task_count(),
        };

        for batch in &plan.batches {
            if Instant::now() >= deadline {
                return self.fail(group, self.timeout_reason());
            }
            if state.batch(batch.index).complete && matches!(stage.load_composite(batch.index), Ok(Some(_))) {
                debug!("Batch {} of '{}' already merged", batch.index + 1, group);
                continue;
            }
            if let Some(reason) = self.run_batch(plan, batch, &state, &stage, &pool, deadline, &mut progress)? {
                return self.fail(group, reason);
            }
        }
        drop(pool);

        if let Some(reason) = self.upload_composites(plan, &stage, deadline)? {
            return self.fail(group, reason);
        }

        let trigger = self.capabilities.reporter.clone();
        let report_group = group.clone();
        if let Err(e) = call_with_timeout(self.settings.task_timeout, move || trigger.trigger(&report_group)) {
            warn!("Report trigger for '{}' failed: {}", group, e);
        }
        self.events.emit(Event::ReportReady { group: group.clone() });

        self.tracker.mark_completed(group)?;
        if let Err(e) = stage.clear() {
            warn!("Could not clear staging for '{}': {}", group, e);
        }
        info!("Group '{}' completed", group);
        Ok(GroupOutcome::Completed {
            group: group.clone(),
            batches: plan.batches.len(),
        })
    }

    /// Run the open batch's unfinished tasks, record each result, then merge
    /// the successful outputs in plan order. Returns a failure reason when the
    /// group must stop here.
    #[allow(clippy::too_many_arguments)]
    fn run_batch(
        &self,
        plan: &Plan,
        batch: &Batch,
        state: &ExecutionState,
        stage: &StageArea,
        pool: &rayon::ThreadPool,
        deadline: Instant,
        progress: &mut GroupProgress<'_>,
    ) -> Result<Option<String>> {
        let group = &plan.group_id;
        let pending: Vec<&Task> = batch
            .tasks
            .iter()
            .filter(|task| !(state.task_mark(task.id()) == TaskMark::Success && stage.has_task_output(task)))
            .collect();
        debug!(
            "Batch {}/{} of '{}': {} of {} task(s) to run",
            batch.index + 1,
            plan.batches.len(),
            group,
            pending.len(),
            batch.tasks.len()
        );

        let (tx, rx) = mpsc::channel::<TaskResult>();
        for task in &pending {
            let job = TaskJob {
                task: (*task).clone(),
                capabilities: self.capabilities.clone(),
                stage: stage.clone(),
                retry: self.settings.retry,
                timeout: self.settings.task_timeout,
            };
            let tx = tx.clone();
            pool.spawn(move || {
                let _ = tx.send(job.execute());
            });
        }
        drop(tx);

        let mut failures: Vec<(ItemRef, u32, CapabilityError)> = Vec::new();
        for _ in 0..pending.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = match rx.recv_timeout(remaining) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => return Ok(Some(self.timeout_reason())),
                Err(RecvTimeoutError::Disconnected) => {
                    return Ok(Some("task workers exited without reporting".to_string()))
                }
            };
            let mark = match result.error() {
                None => {
                    debug!("{} '{}' done in {} attempt(s)", group, result.task.path, result.attempts);
                    TaskMark::Success
                }
                Some(e) => {
                    warn!("Task '{}' of '{}' failed: {}", result.task.path, group, e);
                    failures.push((result.task.clone(), result.attempts, e.clone()));
                    TaskMark::Failure(e.to_string())
                }
            };
            self.tracker.mark_task_result(group, &result.task.id, mark)?;
            progress.advance();
        }

        let failed: BTreeSet<&ItemId> = failures.iter().map(|(item, _, _)| &item.id).collect();
        let mut inputs = Vec::with_capacity(batch.tasks.len());
        for task in batch.tasks.iter().filter(|task| !failed.contains(task.id())) {
            match stage.load_task_output(task) {
                Ok(Some(content)) => inputs.push(MergeInput {
                    item: task.item.clone(),
                    content,
                }),
                Ok(None) => {
                    return Ok(Some(format!("staged output for '{}' is missing", task.item.path)))
                }
                Err(e) => return Ok(Some(format!("staging: {e}"))),
            }
        }

        let complete = failures.is_empty();
        if !inputs.is_empty() {
            let merger = self.capabilities.merger.clone();
            let merged = call_with_timeout(self.settings.task_timeout, move || merger.merge(&inputs));
            let artifact = match merged {
                Ok(artifact) => artifact,
                Err(e) => return Ok(Some(format!("merge of batch {} failed: {e}", batch.index + 1))),
            };
            if let Err(e) = stage.save_composite(batch.index, &artifact) {
                return Ok(Some(format!("staging: {e}")));
            }
            self.tracker.mark_batch_merged(group, batch.index, complete)?;
        }

        if complete {
            Ok(None)
        } else {
            let named: Vec<String> = failures
                .iter()
                .map(|(item, attempts, e)| format!("'{}' ({e}, {attempts} attempt(s))", item.path))
                .collect();
            Ok(Some(format!(
                "batch {} task failure: {}",
                batch.index + 1,
                named.join(", ")
            )))
        }
    }

    /// Upload every merged composite not yet acknowledged, in batch order.
    fn upload_composites(&self, plan: &Plan, stage: &StageArea, deadline: Instant) -> Result<Option<String>> {
        let group = &plan.group_id;
        let state = self.tracker.state(group)?;

        for batch in &plan.batches {
            if state.batch(batch.index).uploaded {
                continue;
            }
            if Instant::now() >= deadline {
                return Ok(Some(self.timeout_reason()));
            }
            let artifact = match stage.load_composite(batch.index) {
                Ok(Some(artifact)) => artifact,
                Ok(None) => {
                    return Ok(Some(format!(
                        "composite for batch {} is missing from staging",
                        batch.index + 1
                    )))
                }
                Err(e) => return Ok(Some(format!("staging: {e}"))),
            };

            let destination = destination_for(group, batch.index);
            let label = format!("upload '{destination}'");
            let (attempts, result) = self.settings.retry.run(&label, || {
                let uploader = self.capabilities.uploader.clone();
                let artifact = artifact.clone();
                let destination = destination.clone();
                call_with_timeout(self.settings.task_timeout, move || {
                    uploader.upload(&artifact, &destination)
                })
            });
            match result {
                Ok(ack) => {
                    info!("Uploaded {} -> {}", ack.destination, ack.location);
                    self.tracker.mark_batch_uploaded(group, batch.index)?;
                }
                Err(e) => {
                    return Ok(Some(format!(
                        "upload of batch {} failed after {attempts} attempt(s): {e}",
                        batch.index + 1
                    )))
                }
            }
        }
        Ok(None)
    }

    fn timeout_reason(&self) -> String {
        format!("group timed out after {:?}", self.settings.group_timeout)
    }
}

/// Remote destination of a batch composite, numbered from 1.
pub fn destination_for(group: &GroupId, batch_index: usize) -> String {
    format!("{group}/{group}_batch_{}", batch_index + 1)
}

struct GroupProgress<'a> {
    reporter: &'a dyn ProgressReporter,
    group: &'a GroupId,
    done: usize,
    total: usize,
}

impl GroupProgress<'_> {
    fn advance(&mut self) {
        self.done = (self.done + 1).min(self.total);
        self.reporter
            .on_task_complete(self.group.as_str(), self.done, self.total);
    }
}

/// Everything one task needs on a pool thread.
struct TaskJob {
    task: Task,
    capabilities: Capabilities,
    stage: StageArea,
    retry: RetryPolicy,
    timeout: Duration,
}

impl TaskJob {
    fn execute(self) -> TaskResult {
        let label = format!("{} '{}'", self.task.action, self.task.item.path);
        let (attempts, result) = self.retry.run(&label, || {
            let task = self.task.clone();
            let capabilities = self.capabilities.clone();
            call_with_timeout(self.timeout, move || produce(&capabilities, &task))
        });

        let outcome = match result {
            Ok(content) => match self.stage.save_task_output(&self.task, &content) {
                Ok(path) => TaskOutcome::Success(path),
                Err(e) => TaskOutcome::FatalFailure(CapabilityError::Staging(e.to_string())),
            },
            Err(e) if e.is_retryable() => TaskOutcome::RetryableFailure(e),
            Err(e) => TaskOutcome::FatalFailure(e),
        };
        TaskResult {
            task: self.task.item,
            attempts,
            outcome,
        }
    }
}

/// Download the item and normalize it according to its action.
fn produce(capabilities: &Capabilities, task: &Task) -> CapabilityResult<Content> {
    let bytes = capabilities.downloader.download(&task.item)?;
    match task.action {
        ActionKind::DirectInclude => Ok(Content::from_bytes(task.output, bytes)),
        ActionKind::Convert => capabilities.converter.convert(&task.item, &bytes),
        ActionKind::Ocr => capabilities
            .recognizer
            .recognize(&task.item, &bytes)
            .map(Content::Text),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
