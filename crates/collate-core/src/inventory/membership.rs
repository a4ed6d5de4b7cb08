use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::item::{Item, ItemId};
use super::snapshot::Snapshot;
use crate::error::Result;

/// A logical unit (one client) whose files are planned and executed together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Folder a matcher assigned to a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedFolder {
    #[serde(default)]
    pub id: Option<String>,
    pub path: String,
}

/// Matcher output; `None` marks a group the matcher could not place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderMap {
    #[serde(default)]
    pub client_to_folder_map: BTreeMap<String, Option<MatchedFolder>>,
}

impl FolderMap {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Group id → identities of the items that belong to it. Supplied from
/// outside; the engine only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
    groups: BTreeMap<GroupId, BTreeSet<ItemId>>,
}

impl GroupMembership {
    pub fn insert(&mut self, group: GroupId, members: impl IntoIterator<Item = ItemId>) {
        self.groups.entry(group).or_default().extend(members);
    }

    /// Resolve folder assignments against an inventory: a group owns every
    /// item at or below its folder path.
    pub fn from_folder_map(snapshot: &Snapshot, folders: &FolderMap) -> Self {
        let mut membership = Self::default();
        for (group, folder) in &folders.client_to_folder_map {
            let Some(folder) = folder else {
                debug!("Group '{}' has no matched folder, skipping", group);
                continue;
            };
            let members: BTreeSet<ItemId> = snapshot
                .items_under(&folder.path)
                .map(|item| item.id.clone())
                .collect();
            if members.is_empty() {
                warn!(
                    "Folder '{}' for group '{}' matched no inventory items",
                    folder.path, group
                );
            }
            membership.insert(GroupId::new(group.clone()), members);
        }
        membership
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupId, &BTreeSet<ItemId>)> {
        self.groups.iter()
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupId> {
        self.groups.keys()
    }

    pub fn members(&self, group: &GroupId) -> Option<&BTreeSet<ItemId>> {
        self.groups.get(group)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group's items as present in `snapshot`. Members missing from the
    /// inventory are logged and left out.
    pub fn items_for<'a>(&self, group: &GroupId, snapshot: &'a Snapshot) -> Vec<&'a Item> {
        let Some(members) = self.groups.get(group) else {
            return Vec::new();
        };
        members
            .iter()
            .filter_map(|id| {
                let item = snapshot.get(id);
                if item.is_none() {
                    warn!("Member {} of group '{}' is not in the inventory", id, group);
                }
                item
            })
            .collect()
    }

    /// Digest of the group's sorted member set, stamped on plans so a
    /// membership edit is noticed even when no item changed.
    pub fn digest(&self, group: &GroupId) -> String {
        let mut hasher = blake3::Hasher::new();
        if let Some(members) = self.groups.get(group) {
            for id in members {
                hasher.update(id.as_str().as_bytes());
                hasher.update(b"\n");
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}
