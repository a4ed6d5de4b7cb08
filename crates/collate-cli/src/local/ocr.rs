use std::io::{self, Write};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::debug;

use collate_core::capability::{CapabilityError, CapabilityResult, Recognizer};
use collate_core::inventory::ItemRef;

/// Runs the `tesseract` executable on a temporary copy of the image and
/// returns what it prints.
pub struct TesseractRecognizer {
    program: String,
}

impl TesseractRecognizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new("tesseract")
    }
}

impl Recognizer for TesseractRecognizer {
    fn recognize(&self, item: &ItemRef, image: &[u8]) -> CapabilityResult<String> {
        let mut input = NamedTempFile::new()
            .and_then(|mut file| file.write_all(image).map(|_| file))
            .map_err(|e| CapabilityError::Recognition(format!("staging image: {e}")))?;
        input
            .flush()
            .map_err(|e| CapabilityError::Recognition(format!("staging image: {e}")))?;

        let output = Command::new(&self.program)
            .arg(input.path())
            .arg("stdout")
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => CapabilityError::UnsupportedFormat(format!(
                    "OCR needs '{}' on PATH",
                    self.program
                )),
                _ => CapabilityError::Recognition(format!("{}: {e}", self.program)),
            })?;

        if !output.status.success() {
            return Err(CapabilityError::Recognition(format!(
                "{} exited with {} on {}: {}",
                self.program,
                output.status,
                item.path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("Recognized {} chars in {}", text.len(), item.path);
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collate_core::inventory::ItemId;

    fn item() -> ItemRef {
        ItemRef {
            id: ItemId::new("scan"),
            path: "Acme/scan.png".to_string(),
            mime_type: Some("image/png".to_string()),
        }
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let recognizer = TesseractRecognizer::new("collate-no-such-ocr-binary");
        let err = recognizer.recognize(&item(), &[0x89, 0x50]).unwrap_err();
        assert!(matches!(err, CapabilityError::UnsupportedFormat(_)));
        assert!(!err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_retryable() {
        // `cat <image> stdout` fails on the missing "stdout" file
        let recognizer = TesseractRecognizer::new("cat");
        let err = recognizer.recognize(&item(), b"hello").unwrap_err();
        assert!(err.is_retryable());
    }
}
