use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use collate_core::capability::{Ack, Artifact, CapabilityError, CapabilityResult, Downloader, Uploader};
use collate_core::inventory::ItemRef;
use collate_core::persist;

/// Reads items from a local mirror of the remote tree.
pub struct MirrorDownloader {
    root: PathBuf,
}

impl MirrorDownloader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Downloader for MirrorDownloader {
    fn download(&self, item: &ItemRef) -> CapabilityResult<Vec<u8>> {
        let path = confined(&self.root, &item.path)?;
        debug!("Reading {}", path.display());
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CapabilityError::NotFound(item.path.clone()),
            io::ErrorKind::PermissionDenied => CapabilityError::PermissionDenied(item.path.clone()),
            _ => CapabilityError::Transfer(format!("{}: {}", item.path, e)),
        })
    }
}

/// Writes composites under an output directory: `<destination>.txt`, plus
/// `<destination>.pdf` when the artifact carries a document.
pub struct OutputUploader {
    root: PathBuf,
}

impl OutputUploader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Uploader for OutputUploader {
    fn upload(&self, artifact: &Artifact, destination: &str) -> CapabilityResult<Ack> {
        let base = confined(&self.root, destination)?;
        let text_path = suffixed(&base, "txt");
        write(&text_path, artifact.text.as_bytes())?;
        if let Some(document) = &artifact.document {
            write(&suffixed(&base, "pdf"), document)?;
        }
        Ok(Ack {
            destination: destination.to_string(),
            location: text_path.display().to_string(),
        })
    }
}

/// Group names may contain dots, so the extension is appended rather than
/// swapped in.
fn suffixed(base: &Path, extension: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn write(path: &Path, bytes: &[u8]) -> CapabilityResult<()> {
    persist::write_bytes_atomic(path, bytes)
        .map_err(|e| CapabilityError::Transfer(format!("{}: {}", path.display(), e)))
}

/// Join a `/`-separated relative path onto `root`, refusing anything that
/// would escape it.
fn confined(root: &Path, relative: &str) -> CapabilityResult<PathBuf> {
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(CapabilityError::PermissionDenied(format!(
            "{} is outside {}",
            relative.display(),
            root.display()
        )));
    }
    Ok(root.join(relative))
}
