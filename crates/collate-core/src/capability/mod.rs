//! Ports to the outside world. The executor reaches storage, conversion, OCR,
//! merging and reporting only through these traits.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::inventory::{GroupId, ItemRef};
use crate::plan::ContentFormat;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("report trigger failed: {0}")]
    Report(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("capability panicked: {0}")]
    Panicked(String),

    #[error("could not stage output: {0}")]
    Staging(String),
}

impl CapabilityError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Transfer(_)
                | CapabilityError::Conversion(_)
                | CapabilityError::Recognition(_)
                | CapabilityError::Timeout(_)
        )
    }
}

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

/// Normalized output of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Document(Vec<u8>),
    Text(String),
}

impl Content {
    pub fn format(&self) -> ContentFormat {
        match self {
            Content::Document(_) => ContentFormat::Document,
            Content::Text(_) => ContentFormat::Text,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Content::Document(bytes) => bytes,
            Content::Text(text) => text.as_bytes(),
        }
    }

    pub fn from_bytes(format: ContentFormat, bytes: Vec<u8>) -> Self {
        match format {
            ContentFormat::Document => Content::Document(bytes),
            ContentFormat::Text => Content::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

/// One successful task output handed to the merger, in plan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInput {
    pub item: ItemRef,
    pub content: Content,
}

/// Composite produced for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    pub document: Option<Vec<u8>>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub destination: String,
    /// Where the uploader actually put the artifact.
    pub location: String,
}

pub trait Downloader: Send + Sync {
    fn download(&self, item: &ItemRef) -> CapabilityResult<Vec<u8>>;
}

pub trait Converter: Send + Sync {
    fn convert(&self, item: &ItemRef, bytes: &[u8]) -> CapabilityResult<Content>;
}

pub trait Recognizer: Send + Sync {
    fn recognize(&self, item: &ItemRef, image: &[u8]) -> CapabilityResult<String>;
}

pub trait Merger: Send + Sync {
    fn merge(&self, inputs: &[MergeInput]) -> CapabilityResult<Artifact>;
}

pub trait Uploader: Send + Sync {
    fn upload(&self, artifact: &Artifact, destination: &str) -> CapabilityResult<Ack>;
}

/// Fired once per completed group. Failures are logged, never retried.
pub trait ReportTrigger: Send + Sync {
    fn trigger(&self, group: &GroupId) -> CapabilityResult<()>;
}

/// Every port the executor needs, shareable across worker threads.
#[derive(Clone)]
pub struct Capabilities {
    pub downloader: Arc<dyn Downloader>,
    pub converter: Arc<dyn Converter>,
    pub recognizer: Arc<dyn Recognizer>,
    pub merger: Arc<dyn Merger>,
    pub uploader: Arc<dyn Uploader>,
    pub reporter: Arc<dyn ReportTrigger>,
}
