use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::task::{task_for_item, Task};
use crate::inventory::{GroupId, Item};

/// Items the classification rule could not place, reported all at once so an
/// operator sees every offender in one pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("group '{group}' has {} unclassifiable item(s): {}", .unclassified.len(), render(.unclassified))]
pub struct PlanningError {
    pub group: GroupId,
    /// (path, detected type)
    pub unclassified: Vec<(String, String)>,
}

fn render(items: &[(String, String)]) -> String {
    items
        .iter()
        .map(|(path, mime)| format!("{path} [{mime}]"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// An ordered, contiguous run of tasks producing one composite artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    pub total_size: u64,
    pub tasks: Vec<Task>,
}

impl Batch {
    fn new(index: usize) -> Self {
        Self {
            index,
            total_size: 0,
            tasks: Vec::new(),
        }
    }

    fn push(&mut self, task: Task) {
        self.total_size = self.total_size.saturating_add(task.estimated_size);
        self.tasks.push(task);
    }
}

/// The ordered batches for one group, stamped with a content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub group_id: GroupId,
    pub hash: String,
    pub generated_at: DateTime<Utc>,
    pub size_ceiling: u64,
    pub membership_digest: String,
    pub batches: Vec<Batch>,
}

impl Plan {
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.batches.iter().flat_map(|batch| batch.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.batches.iter().map(|batch| batch.tasks.len()).sum()
    }

    pub fn total_size(&self) -> u64 {
        self.batches.iter().map(|batch| batch.total_size).sum()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}]: {} tasks in {} batches",
            self.group_id,
            &self.hash[..self.hash.len().min(12)],
            self.task_count(),
            self.batches.len()
        )
    }
}

/// Build a group's plan.
///
/// Folders produce no work. Files are ordered by path (identity breaks ties)
/// and packed greedily: a batch closes when the next task would push it past
/// `size_ceiling`. A task larger than the ceiling gets a batch to itself and
/// is never split.
pub fn plan(
    group: &GroupId,
    items: &[&Item],
    size_ceiling: u64,
    membership_digest: &str,
) -> Result<Plan, PlanningError> {
    let mut files: Vec<&Item> = items.iter().copied().filter(|item| item.is_file()).collect();
    files.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
    files.dedup_by(|a, b| a.id == b.id);

    let mut tasks = Vec::with_capacity(files.len());
    let mut unclassified = Vec::new();
    for item in files {
        match task_for_item(item) {
            Ok(task) => tasks.push(task),
            Err(mime) => unclassified.push((item.path.clone(), mime)),
        }
    }
    if !unclassified.is_empty() {
        return Err(PlanningError {
            group: group.clone(),
            unclassified,
        });
    }

    let batches = pack(tasks, size_ceiling);
    let hash = content_hash(&batches);
    debug!(
        "Planned group '{}': {} batches, hash {}",
        group,
        batches.len(),
        &hash[..12]
    );

    Ok(Plan {
        group_id: group.clone(),
        hash,
        generated_at: Utc::now(),
        size_ceiling,
        membership_digest: membership_digest.to_string(),
        batches,
    })
}

fn pack(tasks: Vec<Task>, size_ceiling: u64) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch::new(0);

    for task in tasks {
        let would_be = current.total_size.saturating_add(task.estimated_size);
        if would_be > size_ceiling && !current.tasks.is_empty() {
            let next = Batch::new(current.index + 1);
            batches.push(std::mem::replace(&mut current, next));
        }
        current.push(task);
    }
    if !current.tasks.is_empty() {
        batches.push(current);
    }
    batches
}

/// Hash over batch boundaries and each task's identity, action and
/// fingerprint. The generation timestamp is not an input.
fn content_hash(batches: &[Batch]) -> String {
    let mut hasher = blake3::Hasher::new();
    for batch in batches {
        hasher.update(format!("batch:{}\n", batch.index).as_bytes());
        for task in &batch.tasks {
            hasher.update(task.item.id.as_str().as_bytes());
            hasher.update(b"\0");
            hasher.update(task.action.as_str().as_bytes());
            hasher.update(b"\0");
            hasher.update(task.fingerprint.as_bytes());
            hasher.update(b"\n");
        }
    }
    hasher.finalize().to_hex().to_string()
}
