/// Trait for reporting cycle progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations and may be called from several worker threads at once.
pub trait ProgressReporter: Send + Sync {
    fn on_diff_complete(&self, _added: usize, _removed: usize, _modified: usize) {}
    fn on_plan_start(&self, _groups: usize) {}
    fn on_plan_progress(&self, _planned: usize, _groups: usize) {}
    fn on_plan_complete(&self, _changed: usize, _failed: usize, _duration_secs: f64) {}
    fn on_run_start(&self, _groups: usize) {}
    fn on_group_start(&self, _group: &str, _tasks: usize) {}
    fn on_task_complete(&self, _group: &str, _done: usize, _tasks: usize) {}
    fn on_group_complete(&self, _group: &str, _succeeded: bool) {}
    fn on_run_complete(&self, _completed: usize, _failed: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
