use calamine::{Reader, Xlsx};
use std::io::Cursor;
use tracing::debug;

use collate_core::capability::{CapabilityError, CapabilityResult, Content, Converter};
use collate_core::inventory::ItemRef;

/// Text extraction for word-processing documents (docx-rs) and spreadsheets
/// (calamine). Google Docs and Sheets in the mirror are expected as their
/// exported .docx and .xlsx bytes.
pub struct DocumentConverter;

impl Converter for DocumentConverter {
    fn convert(&self, item: &ItemRef, bytes: &[u8]) -> CapabilityResult<Content> {
        let mime = item.mime_type.as_deref().unwrap_or_default();
        let text = if mime.contains("wordprocessingml") || mime.contains("google-apps.document") {
            docx_text(bytes)?
        } else if mime.contains("spreadsheetml") || mime.contains("google-apps.spreadsheet") {
            sheet_text(bytes)?
        } else {
            return Err(CapabilityError::UnsupportedFormat(format!(
                "{} [{}]",
                item.path,
                if mime.is_empty() { "unknown type" } else { mime }
            )));
        };
        debug!("Converted {} ({} chars)", item.path, text.len());
        Ok(Content::Text(text))
    }
}

fn docx_text(bytes: &[u8]) -> CapabilityResult<String> {
    let doc = docx_rs::read_docx(bytes)
        .map_err(|e| CapabilityError::UnsupportedFormat(format!("unreadable docx: {e}")))?;

    let mut text = String::new();
    for child in &doc.document.children {
        push_document_child(child, &mut text);
    }
    Ok(text.trim_end().to_string())
}

fn push_document_child(element: &docx_rs::DocumentChild, output: &mut String) {
    match element {
        docx_rs::DocumentChild::Paragraph(para) => {
            push_paragraph(para, output);
            output.push('\n');
        }
        docx_rs::DocumentChild::Table(table) => {
            for row in &table.rows {
                let docx_rs::TableChild::TableRow(tr) = row;
                let mut cells = Vec::new();
                for cell in &tr.cells {
                    let docx_rs::TableRowChild::TableCell(tc) = cell;
                    let mut cell_text = String::new();
                    for child in &tc.children {
                        if let docx_rs::TableCellContent::Paragraph(para) = child {
                            push_paragraph(para, &mut cell_text);
                        }
                    }
                    cells.push(cell_text);
                }
                output.push_str(&cells.join(" | "));
                output.push('\n');
            }
        }
        _ => {}
    }
}

fn push_paragraph(para: &docx_rs::Paragraph, output: &mut String) {
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => push_run(run, output),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let docx_rs::ParagraphChild::Run(run) = inner {
                        push_run(run, output);
                    }
                }
            }
            _ => {}
        }
    }
}

fn push_run(run: &docx_rs::Run, output: &mut String) {
    for run_child in &run.children {
        if let docx_rs::RunChild::Text(text) = run_child {
            output.push_str(&text.text);
        }
    }
}

fn sheet_text(bytes: &[u8]) -> CapabilityResult<String> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))
        .map_err(|e| CapabilityError::UnsupportedFormat(format!("unreadable workbook: {e}")))?;

    let mut text = String::new();
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    for sheet_name in &sheet_names {
        let range = workbook
            .worksheet_range(sheet_name)
            .map_err(|e| CapabilityError::Conversion(format!("sheet '{sheet_name}': {e}")))?;
        text.push_str(&format!("=== Sheet: {sheet_name} ===\n"));
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| cell.to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !cells.is_empty() {
                text.push_str(&cells.join(" | "));
                text.push('\n');
            }
        }
    }
    Ok(text.trim_end().to_string())
}
