use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a remote file or folder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

/// One inventory record. Never mutated after the scan that produced it; a
/// change shows up as a newer Item with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub path: String,
    #[serde(default, alias = "parentId")]
    pub parent_id: Option<ItemId>,
    pub kind: ItemKind,
    #[serde(default)]
    pub size: u64,
    #[serde(alias = "modifiedTime")]
    pub modified: DateTime<Utc>,
    /// Content hash, or a timestamp-derived token when the crawler has no hash.
    pub fingerprint: String,
    #[serde(default, alias = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Item {
    pub fn is_file(&self) -> bool {
        self.kind == ItemKind::File
    }

    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef {
            id: self.id.clone(),
            path: self.path.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// True when both records describe the same content revision.
    pub fn same_revision(&self, other: &Item) -> bool {
        self.fingerprint == other.fingerprint && self.modified == other.modified
    }
}

/// The slice of an Item the capability ports need to locate and interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: ItemId,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawler_spellings_are_accepted() {
        let line = r#"{"id":"f1","path":"Root/Acme/a.pdf","kind":"file","size":12,
            "modifiedTime":"2024-03-01T10:00:00Z","fingerprint":"abc","mimeType":"application/pdf"}"#;
        let item: Item = serde_json::from_str(line).unwrap();
        assert_eq!(item.id.as_str(), "f1");
        assert_eq!(item.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(item.name(), "a.pdf");
        assert!(item.is_file());
    }
}
