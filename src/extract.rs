//! Format-specific text extraction (PDF, DOCX, PPTX, plain text).
//!
//! Each format is an [`Extractor`] variant selected by its [`SourceFormat`]
//! tag through [`extractor_for`]. Extractors return one [`ExtractedUnit`]
//! per structural unit (page, paragraph, slide, or whole file) and never
//! panic on bad input: a corrupt file yields an [`ExtractError`] and the
//! caller skips the document.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

use crate::error::ExtractError;
use crate::models::{ExtractedUnit, SourceFormat};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Text extraction capability for one file format.
pub trait Extractor: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// Extract ordered text units from the raw file bytes.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError>;
}

pub struct PdfExtractor;
pub struct DocxExtractor;
pub struct PptxExtractor;
pub struct PlainTextExtractor;

/// Select the extractor for a format tag.
pub fn extractor_for(format: SourceFormat) -> &'static dyn Extractor {
    match format {
        SourceFormat::Pdf => &PdfExtractor,
        SourceFormat::Docx => &DocxExtractor,
        SourceFormat::Pptx => &PptxExtractor,
        SourceFormat::PlainText => &PlainTextExtractor,
    }
}

/// Read a file and extract it with the extractor for `format`.
pub fn extract_file(path: &Path, format: SourceFormat) -> Result<Vec<ExtractedUnit>, ExtractError> {
    let bytes = std::fs::read(path)?;
    extractor_for(format).extract(&bytes)
}

impl Extractor for PdfExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
        // pdf-extract panics on some malformed inputs.
        let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| ExtractError::Pdf("parser panicked on malformed input".to_string()))?
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| ExtractedUnit {
                text,
                page_or_slide: Some(i as u32 + 1),
            })
            .collect())
    }
}

impl Extractor for DocxExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::Docx
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
        let mut archive = open_archive(bytes)?;
        if archive.by_name("word/document.xml").is_err() {
            return Err(ExtractError::Ooxml(
                "word/document.xml not found".to_string(),
            ));
        }
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let paragraphs = extract_paragraphs(&xml)?;

        Ok(paragraphs
            .into_iter()
            .map(|text| ExtractedUnit {
                text,
                page_or_slide: None,
            })
            .collect())
    }
}

impl Extractor for PptxExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::Pptx
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
        let mut archive = open_archive(bytes)?;
        let mut slides: Vec<(u32, String)> = archive
            .file_names()
            .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
            .filter_map(|n| {
                n.trim_start_matches("ppt/slides/slide")
                    .trim_end_matches(".xml")
                    .parse::<u32>()
                    .ok()
                    .map(|num| (num, n.to_string()))
            })
            .collect();
        slides.sort_by_key(|(num, _)| *num);

        let mut units = Vec::new();
        for (num, name) in slides {
            let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            let text = extract_paragraphs(&xml)?.join("\n");
            if !text.trim().is_empty() {
                units.push(ExtractedUnit {
                    text,
                    page_or_slide: Some(num),
                });
            }
        }
        Ok(units)
    }
}

impl Extractor for PlainTextExtractor {
    fn format(&self) -> SourceFormat {
        SourceFormat::PlainText
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<ExtractedUnit>, ExtractError> {
        let text = std::str::from_utf8(bytes).map_err(|e| ExtractError::Text(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ExtractedUnit {
            text: text.to_string(),
            page_or_slide: None,
        }])
    }
}

fn open_archive(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Collect the text runs (`<w:t>` / `<a:t>`) of every non-empty
/// paragraph (`<w:p>` / `<a:p>`) in document order.
fn extract_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut paragraphs = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if matches!(e.local_name().as_ref(), b"tab" | b"br") {
                    current.push(' ');
                }
            }
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        paragraphs.push(trimmed.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    // Text outside any paragraph element.
    let trailing = current.trim();
    if !trailing.is_empty() {
        paragraphs.push(trailing.to_string());
    }

    Ok(paragraphs)
}
