//! Whole-record JSON persistence shared by the plan store, the state tracker
//! and the snapshot store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::Result;

/// Serialize `value` as pretty JSON and swap it into `path` with a rename, so
/// readers see either the old record or the new one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &bytes)
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Read a JSON record; a missing file is `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// File-system safe key for a group id: alphanumerics from the id plus a short
/// digest so distinct ids never collide after sanitizing.
pub fn group_key(group: &str) -> String {
    let readable: String = group
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(48)
        .collect();
    let digest = blake3::hash(group.as_bytes()).to_hex();
    format!("{}-{}", readable, &digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_and_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("record.json");

        let missing: Option<Vec<u32>> = read_json(&path).unwrap();
        assert!(missing.is_none());

        write_json_atomic(&path, &vec![1u32, 2, 3]).unwrap();
        let loaded: Option<Vec<u32>> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        // No temp files left beside the record
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_group_key_is_stable_and_distinct() {
        assert_eq!(group_key("Acme Corp."), group_key("Acme Corp."));
        assert_ne!(group_key("Acme Corp."), group_key("AcmeCorp"));
        assert!(group_key("Acme Corp.").starts_with("AcmeCorp-"));
    }
}
