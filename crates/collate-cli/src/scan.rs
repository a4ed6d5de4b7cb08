use chrono::{DateTime, Utc};
use dashmap::DashMap;
use glob::Pattern;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use collate_core::inventory::{Item, ItemId, ItemKind, Snapshot};

const FOLDER_FINGERPRINT: &str = "folder";

pub struct ScanOutcome {
    pub snapshot: Snapshot,
    pub files: usize,
    pub folders: usize,
    pub bytes: u64,
}

/// Crawl `root` into a snapshot keyed by relative path. Files are
/// fingerprinted with blake3 in parallel; unreadable entries are logged and
/// left out.
pub fn scan_mirror<F>(
    root: &Path,
    key_scheme: &str,
    ignore_globs: &[String],
    on_progress: F,
) -> io::Result<ScanOutcome>
where
    F: Fn(usize) + Sync,
{
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Mirror root {} is not a directory", root.display()),
        ));
    }

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let entries: Vec<(PathBuf, bool)> = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
        })
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_symlink() => None,
            Ok(entry) => Some((entry.path().to_path_buf(), entry.file_type().is_dir())),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .collect();
    debug!("Found {} entries under {}", entries.len(), root.display());

    let items: DashMap<ItemId, Item> = DashMap::new();
    let seen = AtomicUsize::new(0);
    entries.par_iter().for_each(|(path, is_dir)| {
        match build_item(root, path, *is_dir) {
            Ok(item) => {
                items.insert(item.id.clone(), item);
            }
            Err(e) => error!("Error reading {}: {}", path.display(), e),
        }
        on_progress(seen.fetch_add(1, Ordering::Relaxed) + 1);
    });

    let (mut files, mut folders, mut bytes) = (0, 0, 0u64);
    for entry in items.iter() {
        if entry.value().is_file() {
            files += 1;
            bytes += entry.value().size;
        } else {
            folders += 1;
        }
    }

    let snapshot = Snapshot::new(key_scheme, items.into_iter().map(|(_, item)| item));
    Ok(ScanOutcome {
        snapshot,
        files,
        folders,
        bytes,
    })
}

fn build_item(root: &Path, path: &Path, is_dir: bool) -> io::Result<Item> {
    let metadata = fs::metadata(path)?;
    let relative = relative_key(root, path);
    let parent_id = relative
        .rsplit_once('/')
        .map(|(parent, _)| ItemId::new(parent));
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();

    let (kind, size, fingerprint) = if is_dir {
        (ItemKind::Folder, 0, FOLDER_FINGERPRINT.to_string())
    } else {
        (ItemKind::File, metadata.len(), fingerprint(path)?)
    };

    Ok(Item {
        id: ItemId::new(relative.clone()),
        path: relative,
        parent_id,
        kind,
        size,
        modified,
        fingerprint,
        mime_type: None,
    })
}

/// `/`-separated path relative to the mirror root.
fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn fingerprint(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_mirror(root: &Path) {
        fs::create_dir_all(root.join("Acme/scans")).unwrap();
        fs::create_dir_all(root.join("Beta")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("Acme/notes.txt"), "alpha").unwrap();
        fs::write(root.join("Acme/scans/page1.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        fs::write(root.join("Beta/memo.txt"), "alpha").unwrap();
        fs::write(root.join(".cache/junk.bin"), "junk").unwrap();
    }

    #[test]
    fn test_scan_builds_relative_inventory() {
        let dir = tempdir().unwrap();
        create_mirror(dir.path());

        let ignore = vec!["**/.cache".to_string()];
        let outcome = scan_mirror(dir.path(), "relative-path", &ignore, |_| {}).unwrap();
        assert_eq!(outcome.files, 3);
        assert_eq!(outcome.folders, 3);
        assert_eq!(outcome.bytes, 5 + 4 + 5);

        let snapshot = outcome.snapshot;
        let notes = snapshot.get(&ItemId::new("Acme/notes.txt")).unwrap();
        assert_eq!(notes.parent_id, Some(ItemId::new("Acme")));
        assert!(notes.is_file());
        let page = snapshot.get(&ItemId::new("Acme/scans/page1.png")).unwrap();
        assert_eq!(page.parent_id, Some(ItemId::new("Acme/scans")));
        assert!(!snapshot.contains(&ItemId::new(".cache/junk.bin")));

        // Same bytes, same fingerprint
        let memo = snapshot.get(&ItemId::new("Beta/memo.txt")).unwrap();
        assert_eq!(notes.fingerprint, memo.fingerprint);
    }

    #[test]
    fn test_edit_changes_fingerprint() {
        let dir = tempdir().unwrap();
        create_mirror(dir.path());
        let before = scan_mirror(dir.path(), "relative-path", &[], |_| {}).unwrap();
        fs::write(dir.path().join("Acme/notes.txt"), "beta").unwrap();
        let after = scan_mirror(dir.path(), "relative-path", &[], |_| {}).unwrap();

        let id = ItemId::new("Acme/notes.txt");
        assert_ne!(
            before.snapshot.get(&id).unwrap().fingerprint,
            after.snapshot.get(&id).unwrap().fingerprint
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(scan_mirror(&dir.path().join("absent"), "relative-path", &[], |_| {}).is_err());
    }
}
