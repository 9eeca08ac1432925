//! Plain-text extraction for uploaded PDF and DOCX files.

use std::io::Read;
use thiserror::Error;

/// Maximum decompressed bytes read from `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Upload formats accepted for document chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word processing document.
    Docx,
}

impl DocumentFormat {
    /// Detect the format from the file extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }
}

/// Extraction failures.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// File type is not PDF or DOCX.
    #[error("Unsupported file type for {0}: only .pdf and .docx are accepted")]
    UnsupportedInput(String),
    /// PDF could not be decoded.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    /// DOCX archive or XML could not be read.
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    /// Extraction produced no text.
    #[error("No text could be extracted from {0}")]
    Empty(String),
}

/// Extract text from an upload, rejecting unsupported types before decoding anything.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let format = DocumentFormat::from_filename(filename)
        .ok_or_else(|| ExtractError::UnsupportedInput(filename.to_string()))?;
    let text = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
    };
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(ExtractError::Empty(filename.to_string()));
    }
    tracing::debug!(filename, chars = text.chars().count(), "Extracted document text");
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_from_document_xml(&xml)
}

/// Concatenate `w:t` runs, one line per `w:p` paragraph.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push('\t'),
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file(
                    "word/document.xml",
                    zip::write::SimpleFileOptions::default(),
                )
                .expect("entry");
            writer.write_all(document_xml.as_bytes()).expect("write");
            writer.finish().expect("finish");
        }
        cursor.into_inner()
    }

    #[test]
    fn detects_formats_case_insensitively() {
        assert_eq!(DocumentFormat::from_filename("a.PDF"), Some(DocumentFormat::Pdf));
        assert_eq!(
            DocumentFormat::from_filename("notes.final.docx"),
            Some(DocumentFormat::Docx)
        );
        assert_eq!(DocumentFormat::from_filename("notes.txt"), None);
        assert_eq!(DocumentFormat::from_filename("README"), None);
    }

    #[test]
    fn unsupported_type_is_rejected_before_decoding() {
        let error = extract_text("sheet.xlsx", b"anything").unwrap_err();
        assert!(matches!(error, ExtractError::UnsupportedInput(name) if name == "sheet.xlsx"));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Filing</w:t></w:r><w:r><w:t xml:space="preserve"> deadline &amp; fees</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second paragraph</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_text("memo.docx", &docx_with(xml)).expect("text");
        assert_eq!(text, "Filing deadline & fees\nSecond paragraph");
    }

    #[test]
    fn empty_docx_is_an_error() {
        let xml = r#"<w:document xmlns:w="x"><w:body><w:p/></w:body></w:document>"#;
        let error = extract_text("blank.docx", &docx_with(xml)).unwrap_err();
        assert!(matches!(error, ExtractError::Empty(_)));
    }

    #[test]
    fn corrupt_docx_reports_archive_error() {
        let error = extract_text("broken.docx", b"not a zip").unwrap_err();
        assert!(matches!(error, ExtractError::Docx(_)));
    }
}
