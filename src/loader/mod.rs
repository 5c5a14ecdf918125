
use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::{debug, warn};

use crate::{DocChatError, Result};

/// File types accepted by the upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Txt,
    Docx,
    Doc,
}

/// A decoded logical document: extracted text plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub text: String,
    pub source: String,
}

impl FileType {
    /// Resolve a file type from the substring after the last `.`,
    /// case-insensitively. Returns `None` for anything off the allow-list.
    #[inline]
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, extension) = filename.rsplit_once('.')?;
        match extension.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Txt),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            _ => None,
        }
    }
}

/// Decode a persisted upload into one or more logical documents.
#[inline]
pub fn load_document(path: &Path, filename: &str, file_type: FileType) -> Result<Vec<LoadedDocument>> {
    let text = match file_type {
        FileType::Pdf => extract_pdf_text(path)?,
        FileType::Txt => extract_plain_text(path)?,
        FileType::Docx => extract_docx_text(path)?,
        FileType::Doc => extract_legacy_doc_text(path)?,
    };

    debug!(
        "Decoded {} as {:?}: {} chars extracted",
        filename,
        file_type,
        text.chars().count()
    );

    Ok(vec![LoadedDocument {
        text,
        source: filename.to_string(),
    }])
}

fn extract_plain_text(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).map_err(|e| DocChatError::Decode(format!("Failed to read text file: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// PDF extraction: pdf-extract handles font encodings well but chokes on some
/// malformed files, so fall back to scraping text operators with lopdf.
fn extract_pdf_text(path: &Path) -> Result<String> {
    match pdf_extract::extract_text(path) {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => {
            debug!("pdf-extract returned no text, trying lopdf fallback");
            extract_pdf_text_via_lopdf(path)
        }
        Err(e) => {
            warn!("pdf-extract failed ({e}), trying lopdf fallback");
            extract_pdf_text_via_lopdf(path)
        }
    }
}

fn extract_pdf_text_via_lopdf(path: &Path) -> Result<String> {
    use lopdf::{Document, Object};

    let doc = Document::load(path)
        .map_err(|e| DocChatError::Decode(format!("Failed to load PDF: {e}")))?;

    let mut text = String::new();

    for (_page_number, page_id) in doc.get_pages() {
        let Ok(content) = doc.get_page_content(page_id) else {
            continue;
        };
        let operations = lopdf::content::Content::decode(&content)
            .map(|c| c.operations)
            .unwrap_or_default();

        for op in operations {
            match op.operator.as_str() {
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = op.operands.first() {
                        push_pdf_string(&mut text, bytes);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        for item in items {
                            if let Object::String(bytes, _) = item {
                                push_pdf_string(&mut text, bytes);
                            }
                        }
                    }
                }
                // Positioning operators that imply a line or word break
                "Td" | "TD" | "T*" | "'" | "\"" => {
                    if !text.ends_with('\n') && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
                "ET" => {
                    if !text.ends_with('\n') {
                        text.push('\n');
                    }
                }
                _ => {}
            }
        }
        text.push('\n');
    }

    if text.trim().is_empty() {
        return Err(DocChatError::Decode(
            "PDF contains no extractable text".to_string(),
        ));
    }

    Ok(text)
}

fn push_pdf_string(text: &mut String, bytes: &[u8]) {
    // UTF-8 first, Latin-1 fallback for older encodings
    match std::str::from_utf8(bytes) {
        Ok(s) => text.push_str(s),
        Err(_) => text.extend(bytes.iter().map(|&b| b as char)),
    }
}

/// DOCX is a ZIP archive; the document body lives in `word/document.xml`.
fn extract_docx_text(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .map_err(|e| DocChatError::Decode(format!("Failed to open DOCX: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| DocChatError::Decode(format!("Invalid DOCX archive: {e}")))?;

    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|_| DocChatError::Decode("No document.xml found in DOCX".to_string()))?;

    let mut xml = String::new();
    document_xml
        .read_to_string(&mut xml)
        .map_err(|e| DocChatError::Decode(format!("Failed to read document.xml: {e}")))?;

    Ok(plaintext_from_docx_xml(&xml))
}

/// Pull text runs (`<w:t>` elements) out of the document XML, inserting
/// newlines at paragraph ends (`</w:p>`).
fn plaintext_from_docx_xml(xml: &str) -> String {
    let mut text = String::new();
    let mut in_text_run = false;
    let mut chars = xml.chars();

    while let Some(c) = chars.next() {
        if c != '<' {
            if in_text_run {
                text.push(c);
            }
            continue;
        }

        let mut tag = String::new();
        for tag_char in chars.by_ref() {
            if tag_char == '>' {
                break;
            }
            tag.push(tag_char);
        }

        if tag == "w:t" || tag.starts_with("w:t ") {
            in_text_run = true;
        } else if tag == "/w:t" {
            in_text_run = false;
        } else if tag == "/w:p" && !text.ends_with('\n') {
            text.push('\n');
        }
    }

    text
}

/// Legacy `.doc` files: many are mislabeled DOCX, so try the ZIP path first,
/// then fall back to scraping printable runs from the binary stream.
fn extract_legacy_doc_text(path: &Path) -> Result<String> {
    if let Ok(text) = extract_docx_text(path) {
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }

    let bytes = fs::read(path)
        .map_err(|e| DocChatError::Decode(format!("Failed to read DOC file: {e}")))?;
    let text = scrape_printable_runs(&bytes);

    if text.trim().is_empty() {
        return Err(DocChatError::Decode(
            "DOC file contains no extractable text".to_string(),
        ));
    }

    Ok(text)
}

/// Keep runs of at least four consecutive printable ASCII characters; the
/// binary OLE framing around them is discarded.
fn scrape_printable_runs(bytes: &[u8]) -> String {
    const MIN_RUN: usize = 4;

    let mut text = String::new();
    let mut run = String::new();

    for &byte in bytes {
        let c = byte as char;
        if c.is_ascii_graphic() || c == ' ' {
            run.push(c);
        } else {
            if run.len() >= MIN_RUN {
                text.push_str(&run);
                text.push(if c == '\r' || c == '\n' { '\n' } else { ' ' });
            }
            run.clear();
        }
    }

    if run.len() >= MIN_RUN {
        text.push_str(&run);
    }

    text
}
