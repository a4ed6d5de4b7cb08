//! Capability implementations against the local filesystem: a mirror of the
//! remote tree as the download source and an output directory as the upload
//! target.

pub mod convert;
pub mod fs;
pub mod merge;
pub mod ocr;
pub mod report;

use std::path::PathBuf;
use std::sync::Arc;

use collate_core::capability::Capabilities;
use collate_core::AppConfig;

pub fn capabilities(config: &AppConfig) -> Capabilities {
    Capabilities {
        downloader: Arc::new(fs::MirrorDownloader::new(PathBuf::from(&config.source_root))),
        converter: Arc::new(convert::DocumentConverter),
        recognizer: Arc::new(ocr::TesseractRecognizer::default()),
        merger: Arc::new(merge::TextMerger),
        uploader: Arc::new(fs::OutputUploader::new(PathBuf::from(&config.output_root))),
        reporter: Arc::new(report::CommandReport::new(config.report.command.clone())),
    }
}
