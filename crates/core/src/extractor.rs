use crate::error::IngestError;
use crate::traits::ResumeExtractor;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

const DOCX_BODY_ENTRY: &str = "word/document.xml";

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfResumeExtractor;

impl ResumeExtractor for PdfResumeExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for page_no in document.get_pages().into_keys() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        debug!(path = %path.display(), pages = pages.len(), "resume pdf extracted");
        Ok(pages.join("\n"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextResumeExtractor;

impl ResumeExtractor for PlainTextResumeExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// Reads the paragraph text out of a Word document's main body part.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxResumeExtractor;

impl ResumeExtractor for DocxResumeExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let mut archive = ZipArchive::new(File::open(path)?)
            .map_err(|error| IngestError::DocxParse(error.to_string()))?;
        let mut entry = archive
            .by_name(DOCX_BODY_ENTRY)
            .map_err(|error| IngestError::DocxParse(format!("{DOCX_BODY_ENTRY}: {error}")))?;

        let mut xml = String::new();
        entry.read_to_string(&mut xml)?;

        let text = docx_body_text(&xml)?;
        debug!(path = %path.display(), chars = text.len(), "resume docx extracted");
        Ok(text)
    }
}

fn docx_body_text(xml: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_run_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|error| IngestError::DocxParse(error.to_string()))?;
        match event {
            Event::Start(tag) if tag.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(tag) => match tag.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => {
                    let paragraph = std::mem::take(&mut current);
                    if !paragraph.trim().is_empty() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Event::Empty(tag) => match tag.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                _ => {}
            },
            Event::Text(text) if in_run_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::DocxParse(error.to_string()))?;
                current.push_str(&unescaped);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !current.trim().is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}

/// Picks an extractor from the file extension.
pub fn extract_resume_text(path: &Path) -> Result<String, IngestError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let text = match extension.as_str() {
        "pdf" => PdfResumeExtractor.extract_text(path)?,
        "docx" => DocxResumeExtractor.extract_text(path)?,
        "txt" | "md" => PlainTextResumeExtractor.extract_text(path)?,
        other => {
            return Err(IngestError::UnsupportedDocument(format!(
                "{} (extension `{other}`)",
                path.display()
            )))
        }
    };

    if text.trim().is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "resume {} contains no text",
            path.display()
        )));
    }
    Ok(text)
}
