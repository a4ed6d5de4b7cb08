use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

use collate_core::capability::{Artifact, CapabilityResult, Content, MergeInput, Merger};

/// Concatenates a batch into one text composite. Each item is preceded by a
/// `Source:` header; PDFs contribute their extracted text.
pub struct TextMerger;

impl Merger for TextMerger {
    fn merge(&self, inputs: &[MergeInput]) -> CapabilityResult<Artifact> {
        let sections: Vec<String> = inputs
            .iter()
            .map(|input| {
                let body = match &input.content {
                    Content::Text(text) => text.clone(),
                    Content::Document(bytes) => document_text(input, bytes),
                };
                format!("Source: {}\n\n{}", input.item.path, body.trim_end())
            })
            .collect();

        Ok(Artifact {
            document: None,
            text: sections.join("\n\n"),
        })
    }
}

fn document_text(input: &MergeInput, bytes: &[u8]) -> String {
    let is_pdf = input.item.mime_type.as_deref() == Some("application/pdf");
    if !is_pdf {
        return format!("[binary content, {} bytes]", bytes.len());
    }

    // pdf-extract can panic on some fonts
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!("No text extracted from {}: {}", input.item.path, e);
            format!("[pdf, {} bytes, no extractable text]", bytes.len())
        }
        Err(_) => {
            warn!("PDF extraction panicked for {}", input.item.path);
            format!("[pdf, {} bytes, no extractable text]", bytes.len())
        }
    }
}
