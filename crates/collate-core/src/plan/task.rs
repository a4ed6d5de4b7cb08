use serde::{Deserialize, Serialize};
use std::fmt;

use crate::inventory::{Item, ItemId, ItemRef};

/// What the executor does with an item after downloading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    DirectInclude,
    Convert,
    Ocr,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::DirectInclude => "DIRECT_INCLUDE",
            ActionKind::Convert => "CONVERT",
            ActionKind::Ocr => "OCR",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a task's output once normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    /// Binary document passed through as-is (PDF, audio).
    Document,
    Text,
}

impl ContentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContentFormat::Document => "bin",
            ContentFormat::Text => "txt",
        }
    }
}

/// One unit of per-item work inside a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub item: ItemRef,
    pub action: ActionKind,
    pub output: ContentFormat,
    pub estimated_size: u64,
    pub fingerprint: String,
}

impl Task {
    pub fn id(&self) -> &ItemId {
        &self.item.id
    }
}

const DIRECT_DOCUMENT_TYPES: &[&str] = &["application/pdf", "audio/mpeg"];
const DIRECT_TEXT_TYPES: &[&str] = &["text/plain", "text/markdown"];
const CONVERTIBLE_MARKERS: &[&str] = &[
    "google-apps.document",
    "wordprocessingml",
    "google-apps.spreadsheet",
    "spreadsheetml",
];

/// The recorded MIME type, else a guess from the path extension.
pub fn effective_mime(item: &Item) -> Option<String> {
    item.mime_type
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| {
            mime_guess::from_path(&item.path)
                .first()
                .map(|m| m.essence_str().to_string())
        })
}

/// Fixed classification rule: exactly one action per recognized type,
/// `None` for anything else.
pub fn classify(mime: &str) -> Option<(ActionKind, ContentFormat)> {
    let mime = mime.trim().to_ascii_lowercase();
    if DIRECT_DOCUMENT_TYPES.contains(&mime.as_str()) {
        Some((ActionKind::DirectInclude, ContentFormat::Document))
    } else if DIRECT_TEXT_TYPES.contains(&mime.as_str()) {
        Some((ActionKind::DirectInclude, ContentFormat::Text))
    } else if CONVERTIBLE_MARKERS.iter().any(|marker| mime.contains(marker)) {
        Some((ActionKind::Convert, ContentFormat::Text))
    } else if mime.starts_with("image/") {
        Some((ActionKind::Ocr, ContentFormat::Text))
    } else {
        None
    }
}

/// Build the task for a file item, or report why it cannot be classified.
pub fn task_for_item(item: &Item) -> Result<Task, String> {
    let mime = effective_mime(item);
    let (action, output) = mime
        .as_deref()
        .and_then(classify)
        .ok_or_else(|| mime.unwrap_or_else(|| "unknown type".to_string()))?;

    let mut item_ref = item.item_ref();
    if item_ref.mime_type.is_none() {
        item_ref.mime_type = effective_mime(item);
    }

    Ok(Task {
        item: item_ref,
        action,
        output,
        estimated_size: item.size,
        fingerprint: item.fingerprint.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ItemKind;
    use chrono::Utc;

    fn file(path: &str, mime: Option<&str>) -> Item {
        Item {
            id: ItemId::new(path),
            path: path.to_string(),
            parent_id: None,
            kind: ItemKind::File,
            size: 42,
            modified: Utc::now(),
            fingerprint: "fp".to_string(),
            mime_type: mime.map(str::to_string),
        }
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            ("application/pdf", ActionKind::DirectInclude, ContentFormat::Document),
            ("audio/mpeg", ActionKind::DirectInclude, ContentFormat::Document),
            ("text/plain", ActionKind::DirectInclude, ContentFormat::Text),
            ("text/markdown", ActionKind::DirectInclude, ContentFormat::Text),
            (
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                ActionKind::Convert,
                ContentFormat::Text,
            ),
            ("application/vnd.google-apps.spreadsheet", ActionKind::Convert, ContentFormat::Text),
            ("image/png", ActionKind::Ocr, ContentFormat::Text),
        ];
        for (mime, action, output) in cases {
            assert_eq!(classify(mime), Some((action, output)), "{mime}");
        }
        assert_eq!(classify("application/zip"), None);
        assert_eq!(classify("video/mp4"), None);
    }

    #[test]
    fn test_extension_fallback_when_crawler_omits_mime() {
        let task = task_for_item(&file("Root/Acme/scan.jpg", None)).unwrap();
        assert_eq!(task.action, ActionKind::Ocr);
        assert_eq!(task.item.mime_type.as_deref(), Some("image/jpeg"));
        assert_eq!(task.estimated_size, 42);
    }

    #[test]
    fn test_recorded_mime_wins_over_extension() {
        let task = task_for_item(&file("Root/Acme/notes", Some("application/pdf"))).unwrap();
        assert_eq!(task.action, ActionKind::DirectInclude);
        assert_eq!(task.output, ContentFormat::Document);
    }

    #[test]
    fn test_unrecognized_type_is_an_error() {
        let err = task_for_item(&file("Root/Acme/archive.zip", None)).unwrap_err();
        assert_eq!(err, "application/zip");
    }
}
