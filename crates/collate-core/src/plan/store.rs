use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::planner::Plan;
use crate::error::Result;
use crate::inventory::GroupId;
use crate::persist;

/// One JSON plan per group under `<state_dir>/plans/`. Written only while
/// planning, read by every run.
#[derive(Debug, Clone)]
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("plans"),
        }
    }

    fn path_for(&self, group: &GroupId) -> PathBuf {
        self.dir
            .join(format!("{}.json", persist::group_key(group.as_str())))
    }

    pub fn load(&self, group: &GroupId) -> Result<Option<Plan>> {
        persist::read_json(&self.path_for(group))
    }

    /// True when no plan is stored for the group or its hash differs.
    pub fn has_changed(&self, group: &GroupId, plan: &Plan) -> Result<bool> {
        Ok(self
            .load(group)?
            .map_or(true, |stored| stored.hash != plan.hash))
    }

    /// Store `plan`, replacing any previous plan wholesale. Returns false
    /// when the stored plan already has the same hash and was left untouched.
    pub fn save(&self, plan: &Plan) -> Result<bool> {
        if !self.has_changed(&plan.group_id, plan)? {
            debug!("Plan for '{}' unchanged, keeping stored copy", plan.group_id);
            return Ok(false);
        }
        persist::write_json_atomic(&self.path_for(&plan.group_id), plan)?;
        info!("Saved plan {}", plan);
        Ok(true)
    }

    pub fn remove(&self, group: &GroupId) -> Result<()> {
        match fs::remove_file(self.path_for(group)) {
            Ok(()) => {
                info!("Removed stale plan for '{}'", group);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All stored plans, ordered by group id.
    pub fn list(&self) -> Result<Vec<Plan>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut plans = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(plan) = persist::read_json::<Plan>(&path)? {
                plans.push(plan);
            }
        }
        plans.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Ok(plans)
    }
}
