use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::inventory::{GroupId, ItemId};
use crate::persist;

pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupStatus::Pending => "PENDING",
            GroupStatus::InProgress => "IN_PROGRESS",
            GroupStatus::Completed => "COMPLETED",
            GroupStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Per-task completion marker. Tasks with no marker are unattempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskMark {
    Unattempted,
    Success,
    Failure(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMarker {
    /// A composite is staged for this batch.
    pub merged: bool,
    /// The staged composite includes every task of the batch.
    pub complete: bool,
    pub uploaded: bool,
}

/// Durable execution record for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub group_id: GroupId,
    pub status: GroupStatus,
    /// Hash of the plan these markers belong to.
    pub plan_hash: Option<String>,
    pub retry_count: u32,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub tasks: BTreeMap<ItemId, TaskMark>,
    #[serde(default)]
    pub batches: BTreeMap<usize, BatchMarker>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    pub fn new(group: &GroupId) -> Self {
        Self {
            group_id: group.clone(),
            status: GroupStatus::Pending,
            plan_hash: None,
            retry_count: 0,
            failure_reason: None,
            tasks: BTreeMap::new(),
            batches: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn task_mark(&self, id: &ItemId) -> TaskMark {
        self.tasks.get(id).cloned().unwrap_or(TaskMark::Unattempted)
    }

    pub fn batch(&self, index: usize) -> BatchMarker {
        self.batches.get(&index).cloned().unwrap_or_default()
    }

    pub fn succeeded_tasks(&self) -> usize {
        self.tasks
            .values()
            .filter(|mark| **mark == TaskMark::Success)
            .count()
    }

    /// Drop everything tied to the previous plan.
    fn rebase(&mut self, plan_hash: Option<&str>) {
        self.status = GroupStatus::Pending;
        self.plan_hash = plan_hash.map(str::to_string);
        self.retry_count = 0;
        self.failure_reason = None;
        self.tasks.clear();
        self.batches.clear();
    }
}

/// Reads and writes one JSON record per group under `<state_dir>/states/`.
///
/// Each record is only ever touched by the worker that owns the group, so no
/// locking happens here.
#[derive(Debug, Clone)]
pub struct StateTracker {
    dir: PathBuf,
}

impl StateTracker {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("states"),
        }
    }

    fn path_for(&self, group: &GroupId) -> PathBuf {
        self.dir
            .join(format!("{}.json", persist::group_key(group.as_str())))
    }

    /// The stored record, or a fresh PENDING one.
    pub fn state(&self, group: &GroupId) -> Result<ExecutionState> {
        Ok(persist::read_json(&self.path_for(group))?.unwrap_or_else(|| ExecutionState::new(group)))
    }

    pub fn get_status(&self, group: &GroupId) -> Result<GroupStatus> {
        Ok(self.state(group)?.status)
    }

    fn store(&self, state: &mut ExecutionState) -> Result<()> {
        state.updated_at = Utc::now();
        persist::write_json_atomic(&self.path_for(&state.group_id), state)
    }

    fn update<F>(&self, group: &GroupId, mutate: F) -> Result<ExecutionState>
    where
        F: FnOnce(&mut ExecutionState) -> Result<()>,
    {
        let mut state = self.state(group)?;
        mutate(&mut state)?;
        self.store(&mut state)?;
        Ok(state)
    }

    /// Bring the record in line with the current plan: a new hash puts the
    /// group back to PENDING with markers and retries cleared.
    pub fn reconcile(&self, group: &GroupId, plan_hash: &str) -> Result<ExecutionState> {
        let state = self.state(group)?;
        if state.plan_hash.as_deref() == Some(plan_hash) {
            return Ok(state);
        }
        self.update(group, |state| {
            if state.status != GroupStatus::Pending || state.plan_hash.is_some() {
                info!(
                    "Plan for '{}' changed ({} -> PENDING), clearing markers",
                    group, state.status
                );
            }
            state.rebase(Some(plan_hash));
            Ok(())
        })
    }

    /// PENDING or FAILED -> IN_PROGRESS. Resuming a FAILED group bumps its
    /// retry count and keeps its markers.
    pub fn mark_started(&self, group: &GroupId, plan_hash: &str) -> Result<ExecutionState> {
        self.update(group, |state| {
            if state.plan_hash.as_deref() != Some(plan_hash) {
                state.rebase(Some(plan_hash));
            }
            match state.status {
                GroupStatus::Pending => {}
                GroupStatus::Failed => state.retry_count += 1,
                from => return Err(transition(group, from, GroupStatus::InProgress)),
            }
            state.status = GroupStatus::InProgress;
            state.failure_reason = None;
            debug!("Group '{}' started (retry {})", group, state.retry_count);
            Ok(())
        })
    }

    pub fn mark_task_result(&self, group: &GroupId, task: &ItemId, mark: TaskMark) -> Result<()> {
        self.update(group, |state| {
            require(group, state.status, GroupStatus::InProgress)?;
            state.tasks.insert(task.clone(), mark);
            Ok(())
        })
        .map(|_| ())
    }

    pub fn mark_batch_merged(&self, group: &GroupId, index: usize, complete: bool) -> Result<()> {
        self.update(group, |state| {
            require(group, state.status, GroupStatus::InProgress)?;
            let marker = state.batches.entry(index).or_default();
            marker.merged = true;
            marker.complete = complete;
            marker.uploaded = false;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn mark_batch_uploaded(&self, group: &GroupId, index: usize) -> Result<()> {
        self.update(group, |state| {
            require(group, state.status, GroupStatus::InProgress)?;
            state.batches.entry(index).or_default().uploaded = true;
            Ok(())
        })
        .map(|_| ())
    }

    pub fn mark_completed(&self, group: &GroupId) -> Result<ExecutionState> {
        self.update(group, |state| {
            require(group, state.status, GroupStatus::InProgress)?;
            state.status = GroupStatus::Completed;
            state.failure_reason = None;
            Ok(())
        })
    }

    /// Record a failure. Markers are kept so the next attempt resumes.
    pub fn mark_failed(&self, group: &GroupId, reason: &str) -> Result<ExecutionState> {
        self.update(group, |state| {
            if state.status == GroupStatus::Completed {
                return Err(transition(group, state.status, GroupStatus::Failed));
            }
            state.status = GroupStatus::Failed;
            state.failure_reason = Some(reason.to_string());
            Ok(())
        })
    }

    /// The group's current items could not be planned, so whatever it did
    /// before no longer applies.
    pub fn mark_planning_failed(&self, group: &GroupId, reason: &str) -> Result<ExecutionState> {
        self.update(group, |state| {
            state.rebase(None);
            state.status = GroupStatus::Failed;
            state.failure_reason = Some(reason.to_string());
            Ok(())
        })
    }

    /// An IN_PROGRESS record at startup has no live owner on a single host.
    /// Turn it into FAILED("interrupted") so it resumes like any failure.
    pub fn recover_interrupted(&self, group: &GroupId) -> Result<bool> {
        if self.get_status(group)? != GroupStatus::InProgress {
            return Ok(false);
        }
        warn!("Group '{}' was left IN_PROGRESS, marking interrupted", group);
        self.mark_failed(group, INTERRUPTED)?;
        Ok(true)
    }

    /// Forget the group entirely; the next run treats it as new.
    pub fn reset(&self, group: &GroupId) -> Result<()> {
        match fs::remove_file(self.path_for(group)) {
            Ok(()) => {
                info!("Reset execution state for '{}'", group);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<ExecutionState>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut states = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(state) = persist::read_json::<ExecutionState>(&path)? {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Ok(states)
    }
}

fn transition(group: &GroupId, from: GroupStatus, to: GroupStatus) -> Error {
    Error::InvalidTransition {
        group: group.to_string(),
        from,
        to,
    }
}

fn require(group: &GroupId, actual: GroupStatus, expected: GroupStatus) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Other(format!(
            "group '{group}' is {actual}, expected {expected}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, StateTracker, GroupId) {
        let dir = tempdir().unwrap();
        let tracker = StateTracker::new(dir.path());
        (dir, tracker, GroupId::new("Acme"))
    }

    #[test]
    fn test_unknown_group_is_pending() {
        let (_dir, tracker, group) = setup();
        assert_eq!(tracker.get_status(&group).unwrap(), GroupStatus::Pending);
        assert!(tracker.list().unwrap().is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let (_dir, tracker, group) = setup();
        tracker.mark_started(&group, "h1").unwrap();
        tracker
            .mark_task_result(&group, &ItemId::new("a"), TaskMark::Success)
            .unwrap();
        tracker.mark_batch_merged(&group, 0, true).unwrap();
        tracker.mark_batch_uploaded(&group, 0).unwrap();
        let state = tracker.mark_completed(&group).unwrap();

        assert_eq!(state.status, GroupStatus::Completed);
        assert_eq!(state.plan_hash.as_deref(), Some("h1"));
        assert!(state.batch(0).uploaded);
        assert_eq!(state.task_mark(&ItemId::new("a")), TaskMark::Success);
        assert_eq!(state.task_mark(&ItemId::new("b")), TaskMark::Unattempted);
    }

    #[test]
    fn test_completed_with_same_hash_cannot_restart() {
        let (_dir, tracker, group) = setup();
        tracker.mark_started(&group, "h1").unwrap();
        tracker.mark_completed(&group).unwrap();

        let err = tracker.mark_started(&group, "h1").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: GroupStatus::Completed,
                to: GroupStatus::InProgress,
                ..
            }
        ));
        assert!(tracker.mark_failed(&group, "x").is_err());
    }

    #[test]
    fn test_failed_resume_keeps_markers_and_counts_retries() {
        let (_dir, tracker, group) = setup();
        tracker.mark_started(&group, "h1").unwrap();
        tracker
            .mark_task_result(&group, &ItemId::new("a"), TaskMark::Success)
            .unwrap();
        tracker.mark_failed(&group, "task b failed").unwrap();

        let state = tracker.mark_started(&group, "h1").unwrap();
        assert_eq!(state.retry_count, 1);
        assert_eq!(state.failure_reason, None);
        assert_eq!(state.succeeded_tasks(), 1);
    }

    #[test]
    fn test_hash_change_resets_to_pending() {
        let (_dir, tracker, group) = setup();
        tracker.mark_started(&group, "h1").unwrap();
        tracker
            .mark_task_result(&group, &ItemId::new("a"), TaskMark::Success)
            .unwrap();
        tracker.mark_completed(&group).unwrap();

        let state = tracker.reconcile(&group, "h2").unwrap();
        assert_eq!(state.status, GroupStatus::Pending);
        assert!(state.tasks.is_empty());
        assert_eq!(state.plan_hash.as_deref(), Some("h2"));

        // Unchanged hash leaves a completed record alone
        tracker.mark_started(&group, "h2").unwrap();
        tracker.mark_completed(&group).unwrap();
        let state = tracker.reconcile(&group, "h2").unwrap();
        assert_eq!(state.status, GroupStatus::Completed);
    }

    #[test]
    fn test_recover_interrupted() {
        let (_dir, tracker, group) = setup();
        assert!(!tracker.recover_interrupted(&group).unwrap());

        tracker.mark_started(&group, "h1").unwrap();
        assert!(tracker.recover_interrupted(&group).unwrap());
        let state = tracker.state(&group).unwrap();
        assert_eq!(state.status, GroupStatus::Failed);
        assert_eq!(state.failure_reason.as_deref(), Some(INTERRUPTED));
    }

    #[test]
    fn test_markers_require_in_progress() {
        let (_dir, tracker, group) = setup();
        assert!(tracker
            .mark_task_result(&group, &ItemId::new("a"), TaskMark::Success)
            .is_err());
        assert!(tracker.mark_completed(&group).is_err());
    }

    #[test]
    fn test_planning_failure_and_reset() {
        let (_dir, tracker, group) = setup();
        tracker.mark_started(&group, "h1").unwrap();
        tracker.mark_completed(&group).unwrap();

        let state = tracker
            .mark_planning_failed(&group, "planning: R/x.zip [application/zip]")
            .unwrap();
        assert_eq!(state.status, GroupStatus::Failed);
        assert_eq!(state.plan_hash, None);

        assert_eq!(tracker.list().unwrap().len(), 1);
        tracker.reset(&group).unwrap();
        tracker.reset(&group).unwrap();
        assert_eq!(tracker.get_status(&group).unwrap(), GroupStatus::Pending);
    }
}
