use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::item::{Item, ItemId};
use crate::error::Result;
use crate::persist;

const PREVIOUS_SNAPSHOT_FILE: &str = "snapshot_last_run.json";

/// A complete inventory at one point in time, keyed by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub key_scheme: String,
    pub taken_at: DateTime<Utc>,
    items: BTreeMap<ItemId, Item>,
}

impl Snapshot {
    pub fn new(key_scheme: &str, items: impl IntoIterator<Item = Item>) -> Self {
        let mut snapshot = Self::empty(key_scheme);
        for item in items {
            snapshot.insert(item);
        }
        snapshot
    }

    pub fn empty(key_scheme: &str) -> Self {
        Self {
            key_scheme: key_scheme.to_string(),
            taken_at: Utc::now(),
            items: BTreeMap::new(),
        }
    }

    fn insert(&mut self, item: Item) {
        if let Some(previous) = self.items.insert(item.id.clone(), item) {
            warn!(
                "Duplicate identity {} in inventory, keeping the later record",
                previous.id
            );
        }
    }

    /// Parse crawler output: one JSON Item per line, blank lines ignored.
    pub fn read_jsonl<R: Read>(reader: R, key_scheme: &str) -> Result<Self> {
        let mut snapshot = Self::empty(key_scheme);
        for line in BufReader::new(reader).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            snapshot.insert(serde_json::from_str(&line)?);
        }
        debug!("Read {} inventory records", snapshot.len());
        Ok(snapshot)
    }

    pub fn load_jsonl(path: &Path, key_scheme: &str) -> Result<Self> {
        Self::read_jsonl(File::open(path)?, key_scheme)
    }

    /// JSON Lines rendering in path order, the format `read_jsonl` accepts.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for item in self.iter_by_path() {
            out.push_str(&serde_json::to_string(item)?);
            out.push('\n');
        }
        Ok(out)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.items.keys()
    }

    /// Items in inventory order (path, then identity).
    pub fn iter_by_path(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.items.values().collect();
        items.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
        items
    }

    /// Items whose path is `folder` itself or lies beneath it.
    pub fn items_under<'a>(&'a self, folder: &'a str) -> impl Iterator<Item = &'a Item> + 'a {
        let folder = folder.trim_matches('/');
        self.items.values().filter(move |item| {
            // An empty folder path is the mirror root
            folder.is_empty()
                || item.path == folder
                || (item.path.starts_with(folder)
                    && item.path[folder.len()..].starts_with('/'))
        })
    }
}

/// Persists the snapshot a cycle diffed against, so the next cycle has an
/// explicit base instead of process state.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(PREVIOUS_SNAPSHOT_FILE),
        }
    }

    pub fn load_previous(&self) -> Result<Option<Snapshot>> {
        persist::read_json(&self.path)
    }

    pub fn save_previous(&self, snapshot: &Snapshot) -> Result<()> {
        persist::write_json_atomic(&self.path, snapshot)?;
        debug!(
            "Saved {} items as the next diff base to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::item::ItemKind;
    use tempfile::tempdir;

    fn item(id: &str, path: &str) -> Item {
        Item {
            id: ItemId::new(id),
            path: path.to_string(),
            parent_id: None,
            kind: ItemKind::File,
            size: 1,
            modified: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            fingerprint: "fp".to_string(),
            mime_type: None,
        }
    }

    #[test]
    fn test_items_under_respects_path_boundaries() {
        let snapshot = Snapshot::new(
            "test",
            vec![
                item("1", "Root/Acme"),
                item("2", "Root/Acme/a.pdf"),
                item("3", "Root/Acme Holdings/b.pdf"),
            ],
        );
        let mut ids: Vec<&str> = snapshot
            .items_under("Root/Acme/")
            .map(|i| i.id.as_str())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_root_folder_covers_whole_mirror() {
        let snapshot = Snapshot::new(
            "test",
            vec![item("1", "Acme"), item("2", "Acme/a.pdf"), item("3", "notes.txt")],
        );
        for root in ["", "/"] {
            assert_eq!(snapshot.items_under(root).count(), 3, "root {root:?}");
        }
        assert_eq!(snapshot.items_under("/Acme").count(), 2);
    }

    #[test]
    fn test_jsonl_roundtrip_preserves_items() {
        let snapshot = Snapshot::new("test", vec![item("b", "Root/b"), item("a", "Root/a")]);
        let text = snapshot.to_jsonl().unwrap();
        assert!(text.starts_with("{\"id\":\"a\""));

        let parsed = Snapshot::read_jsonl(text.as_bytes(), "test").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.get(&ItemId::new("b")), snapshot.get(&ItemId::new("b")));
    }

    #[test]
    fn test_store_returns_none_before_first_save() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load_previous().unwrap().is_none());

        let snapshot = Snapshot::new("test", vec![item("a", "Root/a")]);
        store.save_previous(&snapshot).unwrap();
        assert_eq!(store.load_previous().unwrap(), Some(snapshot));
    }
}
