use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capability::Capabilities;
use crate::config::AppConfig;
use crate::error::Result;
use crate::events::{Event, EventSink};
use crate::executor::{Executor, RunSummary, StageArea};
use crate::inventory::{affected_groups, diff, GroupId, GroupMembership, Snapshot, SnapshotStore};
use crate::plan::{self, Plan, PlanStore};
use crate::progress::ProgressReporter;
use crate::state::{ExecutionState, GroupStatus, StateTracker};

/// Drives one processing cycle: diff the inventory against the last run,
/// re-plan affected groups, reconcile their states, execute what is runnable
/// and record the inventory as the next diff base.
pub struct CollateEngine {
    config: AppConfig,
    plans: PlanStore,
    tracker: StateTracker,
    snapshots: SnapshotStore,
    events: EventSink,
}

#[derive(Debug, Default)]
pub struct PlanningReport {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    /// Groups owning at least one changed item.
    pub affected: Vec<GroupId>,
    /// Groups whose stored plan was replaced.
    pub changed: Vec<GroupId>,
    pub unchanged: usize,
    pub failed: Vec<(GroupId, String)>,
    /// Plans dropped because their group left the membership.
    pub retired: Vec<GroupId>,
}

#[derive(Debug)]
pub struct CycleReport {
    pub planning: PlanningReport,
    pub run: RunSummary,
}

/// One row of `status`: a group's stored plan joined with its execution record.
#[derive(Debug, Clone)]
pub struct GroupOverview {
    pub group: GroupId,
    pub plan: Option<Plan>,
    pub state: ExecutionState,
}

impl CollateEngine {
    pub fn new(config: AppConfig) -> Self {
        let state_dir = config.state_dir();
        Self {
            plans: PlanStore::new(&state_dir),
            tracker: StateTracker::new(&state_dir),
            snapshots: SnapshotStore::new(&state_dir),
            events: EventSink::disabled(),
            config,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn plan_store(&self) -> &PlanStore {
        &self.plans
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn snapshot_store(&self) -> &SnapshotStore {
        &self.snapshots
    }

    fn stage_root(&self) -> PathBuf {
        self.config.state_dir().join("staging")
    }

    /// Diff `current` against the stored snapshot and re-plan every group that
    /// is affected, has no stored plan, or whose membership changed. The
    /// snapshot itself is not committed here.
    pub fn refresh_plans(
        &self,
        current: &Snapshot,
        membership: &GroupMembership,
        reporter: &dyn ProgressReporter,
    ) -> Result<PlanningReport> {
        let start = Instant::now();
        let previous = self.snapshots.load_previous()?;
        let changes = diff(previous.as_ref(), current)?;
        info!(
            "Inventory diff: {} added, {} removed, {} modified",
            changes.added.len(),
            changes.removed.len(),
            changes.modified.len()
        );
        reporter.on_diff_complete(changes.added.len(), changes.removed.len(), changes.modified.len());

        let affected = affected_groups(membership, &changes);
        let stored: BTreeMap<GroupId, Plan> = self
            .plans
            .list()?
            .into_iter()
            .map(|plan| (plan.group_id.clone(), plan))
            .collect();

        let mut report = PlanningReport {
            added: changes.added.len(),
            removed: changes.removed.len(),
            modified: changes.modified.len(),
            affected: affected.iter().cloned().collect(),
            ..PlanningReport::default()
        };

        let ceiling = self.config.size_ceiling_bytes();
        let total = membership.len();
        reporter.on_plan_start(total);
        for (planned, group) in membership.groups().enumerate() {
            reporter.on_plan_progress(planned + 1, total);
            let digest = membership.digest(group);
            let needs_plan = affected.contains(group)
                || stored
                    .get(group)
                    .map_or(true, |plan| plan.membership_digest != digest);
            if !needs_plan {
                report.unchanged += 1;
                continue;
            }

            let items = membership.items_for(group, current);
            match plan::plan(group, &items, ceiling, &digest) {
                Ok(plan) => {
                    if self.plans.save(&plan)? {
                        self.events.emit(Event::ChangeDetected { group: group.clone() });
                        report.changed.push(group.clone());
                    } else {
                        report.unchanged += 1;
                    }
                    self.tracker.reconcile(group, &plan.hash)?;
                }
                Err(e) => {
                    let reason = format!("planning: {e}");
                    error!("{}", reason);
                    self.plans.remove(group)?;
                    self.tracker.mark_planning_failed(group, &reason)?;
                    self.events.emit(Event::GroupFailed {
                        group: group.clone(),
                        reason: reason.clone(),
                    });
                    report.failed.push((group.clone(), reason));
                }
            }
        }

        let members: BTreeSet<&GroupId> = membership.groups().collect();
        for group in stored.keys().filter(|group| !members.contains(group)) {
            self.plans.remove(group)?;
            report.retired.push(group.clone());
        }

        info!(
            "Planning done: {} changed, {} unchanged, {} failed, {} retired",
            report.changed.len(),
            report.unchanged,
            report.failed.len(),
            report.retired.len()
        );
        reporter.on_plan_complete(report.changed.len(), report.failed.len(), start.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Record `current` as the base for the next diff.
    pub fn commit_snapshot(&self, current: &Snapshot) -> Result<()> {
        self.snapshots.save_previous(current)
    }

    /// Stored plans whose groups should run now: PENDING first, then FAILED
    /// groups with retries left, capped at `groups_per_run`.
    pub fn runnable_plans(&self) -> Result<Vec<Plan>> {
        let max_retries = self.config.executor.max_group_retries;
        let mut pending = Vec::new();
        let mut failed = Vec::new();

        for plan in self.plans.list()? {
            if plan.batches.is_empty() {
                debug!("Group '{}' has nothing to prepare", plan.group_id);
                continue;
            }
            let state = self.tracker.reconcile(&plan.group_id, &plan.hash)?;
            match state.status {
                GroupStatus::Pending => pending.push(plan),
                GroupStatus::Failed if state.retry_count < max_retries => failed.push(plan),
                GroupStatus::Failed => warn!(
                    "Group '{}' exhausted {} retries, last failure: {}",
                    plan.group_id,
                    max_retries,
                    state.failure_reason.as_deref().unwrap_or("unknown")
                ),
                GroupStatus::Completed | GroupStatus::InProgress => {}
            }
        }

        pending.extend(failed);
        let limit = self.config.executor.groups_per_run;
        if limit > 0 && pending.len() > limit {
            debug!("Deferring {} group(s) to a later run", pending.len() - limit);
            pending.truncate(limit);
        }
        Ok(pending)
    }

    /// Recover interrupted groups, then execute the runnable plans.
    pub fn run(&self, capabilities: Capabilities, reporter: &dyn ProgressReporter) -> Result<RunSummary> {
        for state in self.tracker.list()? {
            self.tracker.recover_interrupted(&state.group_id)?;
        }

        let plans = self.runnable_plans()?;
        if plans.is_empty() {
            info!("No groups need processing");
            return Ok(RunSummary::default());
        }

        let executor = Executor::new(
            self.config.executor.settings(),
            capabilities,
            self.tracker.clone(),
            self.stage_root(),
        )
        .with_events(self.events.clone());
        executor.run(plans, reporter)
    }

    /// Plan, execute, then commit the snapshot.
    pub fn cycle(
        &self,
        current: &Snapshot,
        membership: &GroupMembership,
        capabilities: Capabilities,
        reporter: &dyn ProgressReporter,
    ) -> Result<CycleReport> {
        let planning = self.refresh_plans(current, membership, reporter)?;
        let run = self.run(capabilities, reporter)?;
        self.commit_snapshot(current)?;
        Ok(CycleReport { planning, run })
    }

    pub fn status(&self) -> Result<Vec<GroupOverview>> {
        let mut rows: BTreeMap<GroupId, GroupOverview> = BTreeMap::new();
        for plan in self.plans.list()? {
            let state = self.tracker.state(&plan.group_id)?;
            rows.insert(
                plan.group_id.clone(),
                GroupOverview {
                    group: plan.group_id.clone(),
                    plan: Some(plan),
                    state,
                },
            );
        }
        for state in self.tracker.list()? {
            rows.entry(state.group_id.clone()).or_insert_with(|| GroupOverview {
                group: state.group_id.clone(),
                plan: None,
                state,
            });
        }
        Ok(rows.into_values().collect())
    }

    /// Drop a group's execution record and staged work so it runs from scratch.
    pub fn reset_group(&self, group: &GroupId) -> Result<()> {
        self.tracker.reset(group)?;
        StageArea::new(&self.stage_root(), group).clear()
    }
}
