#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use collate_core::capability::{
    Ack, Artifact, Capabilities, CapabilityError, CapabilityResult, Content, Converter,
    Downloader, MergeInput, Merger, Recognizer, ReportTrigger, Uploader,
};
use collate_core::inventory::{GroupId, Item, ItemId, ItemKind, ItemRef};

pub fn file(id: &str, path: &str, size: u64, mime: &str) -> Item {
    Item {
        id: ItemId::new(id),
        path: path.to_string(),
        parent_id: None,
        kind: ItemKind::File,
        size,
        modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        fingerprint: format!("fp-{id}"),
        mime_type: Some(mime.to_string()),
    }
}

pub fn text(id: &str, path: &str, size: u64) -> Item {
    file(id, path, size, "text/plain")
}

pub fn folder(id: &str, path: &str) -> Item {
    Item {
        kind: ItemKind::Folder,
        size: 0,
        mime_type: Some("application/vnd.google-apps.folder".to_string()),
        ..file(id, path, 0, "")
    }
}

/// In-memory stand-in for every port. Records what the executor asked for.
#[derive(Default)]
pub struct Fake {
    pub fatal: Mutex<BTreeSet<String>>,
    /// path -> number of transient failures still to serve
    pub transient: Mutex<BTreeMap<String, u32>>,
    /// path -> artificial download latency
    pub delays: Mutex<BTreeMap<String, Duration>>,
    pub downloads: Mutex<BTreeMap<String, u32>>,
    pub merges: Mutex<Vec<Vec<String>>>,
    pub uploads: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<GroupId>>,
    /// Merges whose inputs start with this prefix panic.
    pub panic_prefix: Mutex<Option<String>>,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Fake {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities {
            downloader: self.clone(),
            converter: self.clone(),
            recognizer: self.clone(),
            merger: self.clone(),
            uploader: self.clone(),
            reporter: self.clone(),
        }
    }

    pub fn fail_fatally(&self, path: &str) {
        self.fatal.lock().unwrap().insert(path.to_string());
    }

    pub fn heal(&self) {
        self.fatal.lock().unwrap().clear();
        self.transient.lock().unwrap().clear();
    }

    pub fn fail_transiently(&self, path: &str, times: u32) {
        self.transient.lock().unwrap().insert(path.to_string(), times);
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    pub fn download_count(&self, path: &str) -> u32 {
        self.downloads.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_downloads(&self) -> u32 {
        self.downloads.lock().unwrap().values().sum()
    }
}

impl Downloader for Fake {
    fn download(&self, item: &ItemRef) -> CapabilityResult<Vec<u8>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        *self.downloads.lock().unwrap().entry(item.path.clone()).or_default() += 1;

        let delay = self.delays.lock().unwrap().get(&item.path).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fatal.lock().unwrap().contains(&item.path) {
            return Err(CapabilityError::NotFound(item.path.clone()));
        }
        let mut transient = self.transient.lock().unwrap();
        if let Some(left) = transient.get_mut(&item.path) {
            if *left > 0 {
                *left -= 1;
                return Err(CapabilityError::Transfer("connection reset".to_string()));
            }
        }
        Ok(format!("content of {}", item.path).into_bytes())
    }
}

impl Converter for Fake {
    fn convert(&self, _item: &ItemRef, bytes: &[u8]) -> CapabilityResult<Content> {
        Ok(Content::Text(format!("converted {}", String::from_utf8_lossy(bytes))))
    }
}

impl Recognizer for Fake {
    fn recognize(&self, _item: &ItemRef, image: &[u8]) -> CapabilityResult<String> {
        Ok(format!("recognized {}", String::from_utf8_lossy(image)))
    }
}

impl Merger for Fake {
    fn merge(&self, inputs: &[MergeInput]) -> CapabilityResult<Artifact> {
        let prefix = self.panic_prefix.lock().unwrap().clone();
        if let Some(prefix) = prefix {
            if inputs.iter().any(|input| input.item.path.starts_with(&prefix)) {
                panic!("merger cannot handle {prefix}");
            }
        }
        self.merges
            .lock()
            .unwrap()
            .push(inputs.iter().map(|input| input.item.path.clone()).collect());
        let text = inputs
            .iter()
            .map(|input| String::from_utf8_lossy(input.content.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(Artifact { document: None, text })
    }
}

impl Uploader for Fake {
    fn upload(&self, _artifact: &Artifact, destination: &str) -> CapabilityResult<Ack> {
        self.uploads.lock().unwrap().push(destination.to_string());
        Ok(Ack {
            destination: destination.to_string(),
            location: format!("memory://{destination}"),
        })
    }
}

impl ReportTrigger for Fake {
    fn trigger(&self, group: &GroupId) -> CapabilityResult<()> {
        self.reports.lock().unwrap().push(group.clone());
        Ok(())
    }
}
