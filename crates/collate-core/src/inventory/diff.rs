use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::item::{Item, ItemId};
use super::membership::{GroupId, GroupMembership};
use super::snapshot::Snapshot;
use crate::error::{Error, Result};

/// An item present in both snapshots under a different revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub old: Item,
    pub new: Item,
}

/// What changed between two snapshots. Every identity lands in at most one
/// of `added`, `removed` or `modified`; all three are sorted by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<Item>,
    pub removed: Vec<ItemId>,
    pub modified: Vec<Modification>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// Every identity touched by the change set.
    pub fn touched_ids(&self) -> BTreeSet<&ItemId> {
        self.added
            .iter()
            .map(|item| &item.id)
            .chain(self.removed.iter())
            .chain(self.modified.iter().map(|m| &m.new.id))
            .collect()
    }
}

/// Compare two snapshots by identity. A missing `previous` (first run) is
/// treated as empty, so everything in `current` is added.
pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> Result<ChangeSet> {
    let Some(previous) = previous else {
        return Ok(ChangeSet {
            added: current.iter().cloned().collect(),
            ..ChangeSet::default()
        });
    };

    if previous.key_scheme != current.key_scheme {
        return Err(Error::IncomparableSnapshots {
            previous: previous.key_scheme.clone(),
            current: current.key_scheme.clone(),
        });
    }

    let previous_index: AHashMap<&ItemId, &Item> =
        previous.iter().map(|item| (&item.id, item)).collect();

    let mut change_set = ChangeSet::default();

    for item in current.iter() {
        match previous_index.get(&item.id) {
            None => change_set.added.push(item.clone()),
            Some(old) if !old.same_revision(item) => {
                change_set.modified.push(Modification {
                    old: (*old).clone(),
                    new: item.clone(),
                });
            }
            Some(_) => {}
        }
    }

    change_set.removed = previous
        .ids()
        .filter(|id| !current.contains(id))
        .cloned()
        .collect();

    Ok(change_set)
}

/// Groups owning at least one identity in the change set.
pub fn affected_groups(membership: &GroupMembership, change_set: &ChangeSet) -> BTreeSet<GroupId> {
    let touched = change_set.touched_ids();
    membership
        .iter()
        .filter(|(_, members)| members.iter().any(|id| touched.contains(id)))
        .map(|(group, _)| group.clone())
        .collect()
}
