//! Document Loaders
//!
//! Turns an uploaded file into raw text segments. Dispatch is by extension:
//! - `.pdf`: one segment per page (`pdf-extract`, pages split on form feed)
//! - `.txt` / `.md`: the whole file as one segment
//! - `.csv`: one segment per data row, rendered as `header: value` lines
//! - anything else: the unstructured fallback (DOCX via zip + XML, spreadsheets
//!   via calamine, otherwise plain UTF-8 text when the bytes are not binary)
//!
//! Loaders are synchronous; async callers run them on the blocking pool.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use calamine::Reader;
use quick_xml::events::Event;
use tracing::debug;

use crate::models::document::{DocumentFormat, RawSegment};
use crate::utils::error::{AppError, AppResult};

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_LEN: usize = 8192;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// A format-specific extractor.
pub trait DocumentLoader: Send + Sync {
    fn load(&self, path: &Path) -> AppResult<Vec<RawSegment>>;
}

// ---------------------------------------------------------------------------
// LoaderRegistry
// ---------------------------------------------------------------------------

/// Picks a loader for a path and enforces the document size limit.
pub struct LoaderRegistry {
    max_document_bytes: u64,
    pdf: Box<dyn DocumentLoader>,
    text: Box<dyn DocumentLoader>,
    csv: Box<dyn DocumentLoader>,
    fallback: Box<dyn DocumentLoader>,
}

impl LoaderRegistry {
    pub fn new(max_document_bytes: u64) -> Self {
        Self {
            max_document_bytes,
            pdf: Box::new(PdfLoader),
            text: Box::new(TextLoader),
            csv: Box::new(CsvLoader),
            fallback: Box::new(UnstructuredLoader),
        }
    }

    /// Load `path`. `format_hint` overrides extension-based detection.
    pub fn load(
        &self,
        path: &Path,
        format_hint: Option<&DocumentFormat>,
    ) -> AppResult<Vec<RawSegment>> {
        let size = std::fs::metadata(path)
            .map_err(|e| AppError::load(path, format!("failed to read file metadata: {}", e)))?
            .len();
        if size > self.max_document_bytes {
            return Err(AppError::load(
                path,
                format!(
                    "file too large: {:.1} MB (max {:.1} MB)",
                    size as f64 / (1024.0 * 1024.0),
                    self.max_document_bytes as f64 / (1024.0 * 1024.0)
                ),
            ));
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let format = format_hint
            .cloned()
            .unwrap_or_else(|| DocumentFormat::from_path(path));
        let loader = match format {
            DocumentFormat::Pdf => &self.pdf,
            DocumentFormat::Text | DocumentFormat::Markdown => &self.text,
            DocumentFormat::Csv => &self.csv,
            DocumentFormat::Other(_) => &self.fallback,
        };

        let segments = loader.load(path)?;
        debug!(
            path = %path.display(),
            format = %format,
            segments = segments.len(),
            "document loaded"
        );
        Ok(segments)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new(50 * 1024 * 1024)
    }
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> AppResult<Vec<RawSegment>> {
        // pdf-extract panics on some malformed files instead of returning Err.
        let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path)))
            .map_err(|_| AppError::load(path, "PDF extractor aborted on malformed input"))?
            .map_err(|e| AppError::load(path, format!("failed to extract PDF text: {}", e)))?;

        Ok(extracted
            .split('\x0c')
            .enumerate()
            .filter_map(|(page, text)| {
                let trimmed = text.trim();
                (!trimmed.is_empty()).then(|| RawSegment::new(page, trimmed))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Plain text / Markdown
// ---------------------------------------------------------------------------

pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> AppResult<Vec<RawSegment>> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::load(path, format!("failed to read file: {}", e)))?;
        let text = decode_utf8(&bytes)
            .ok_or_else(|| AppError::load(path, "file is not valid UTF-8 text"))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![RawSegment::new(0, text)])
    }
}

/// Decode UTF-8, dropping a leading byte-order mark.
fn decode_utf8(bytes: &[u8]) -> Option<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).ok()
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub struct CsvLoader;

impl DocumentLoader for CsvLoader {
    fn load(&self, path: &Path) -> AppResult<Vec<RawSegment>> {
        let bytes = std::fs::read(path)
            .map_err(|e| AppError::load(path, format!("failed to read file: {}", e)))?;
        let text = decode_utf8(&bytes)
            .ok_or_else(|| AppError::load(path, "CSV file is not valid UTF-8"))?;
        let mut records = parse_csv(&text).map_err(|e| AppError::load(path, e))?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let headers: Vec<String> = records.remove(0).into_iter().map(|h| h.trim().to_string()).collect();
        Ok(records
            .into_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|(row_index, row)| RawSegment::new(row_index, render_row(&headers, &row)))
            .collect())
    }
}

/// `header: value` per column, one per line. Columns beyond the header row
/// are labelled by position.
fn render_row(headers: &[String], row: &[String]) -> String {
    let columns = headers.len().max(row.len());
    (0..columns)
        .map(|i| {
            let header = headers
                .get(i)
                .filter(|h| !h.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("column_{}", i + 1));
            let value = row.get(i).map(|v| v.trim()).unwrap_or("");
            format!("{}: {}", header, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Minimal RFC 4180 reader: comma separated, `"` quoting with `""` escapes,
/// quoted fields may span lines. Accepts `\n` and `\r\n` line endings.
fn parse_csv(input: &str) -> Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut field_started = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if !field_started => {
                in_quotes = true;
                field_started = true;
            }
            ',' => {
                record.push(std::mem::take(&mut field));
                field_started = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
                field_started = false;
            }
            _ => {
                field.push(c);
                field_started = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if field_started || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // Blank lines produce a single empty field; they carry no data.
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    Ok(records)
}

// ---------------------------------------------------------------------------
// Unstructured fallback
// ---------------------------------------------------------------------------

/// Generic extractor for formats without a dedicated loader.
pub struct UnstructuredLoader;

impl DocumentLoader for UnstructuredLoader {
    fn load(&self, path: &Path) -> AppResult<Vec<RawSegment>> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let structured = if ext == "docx" {
            Some(parse_docx(path))
        } else if SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            Some(parse_spreadsheet(path))
        } else {
            None
        };

        match structured {
            Some(Ok(segments)) => return Ok(segments),
            Some(Err(e)) => {
                debug!(path = %path.display(), error = %e, "structured extraction failed, trying plain text");
            }
            None => {}
        }

        let bytes = std::fs::read(path)
            .map_err(|e| AppError::load(path, format!("failed to read file: {}", e)))?;
        if is_binary_content(&bytes) {
            return Err(AppError::UnsupportedFormat {
                path: path.to_path_buf(),
            });
        }
        let text = decode_utf8(&bytes).ok_or_else(|| AppError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![RawSegment::new(0, text)])
    }
}

fn is_binary_content(data: &[u8]) -> bool {
    let check_len = data.len().min(BINARY_SNIFF_LEN);
    data[..check_len].contains(&0)
}

/// Extract paragraph text from `word/document.xml`, one segment in total.
fn parse_docx(path: &Path) -> Result<Vec<RawSegment>, String> {
    let file = std::fs::File::open(path).map_err(|e| format!("failed to open DOCX: {}", e))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| format!("failed to read DOCX as ZIP: {}", e))?;

    let mut doc_xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| "invalid DOCX: missing word/document.xml".to_string())?
        .read_to_string(&mut doc_xml)
        .map_err(|e| format!("failed to read document.xml: {}", e))?;

    let mut reader = quick_xml::Reader::from_str(&doc_xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut paragraph = String::new();
    let mut in_text = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"p" => paragraph.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    paragraph.clear();
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                if let Ok(text) = e.unescape() {
                    paragraph.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    if paragraphs.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![RawSegment::new(0, paragraphs.join("\n\n"))])
}

/// One segment per non-empty sheet, rows rendered as ` | `-joined cells.
fn parse_spreadsheet(path: &Path) -> Result<Vec<RawSegment>, String> {
    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| format!("failed to open spreadsheet: {}", e))?;
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    let mut segments = Vec::new();
    for (index, name) in sheet_names.iter().enumerate() {
        let range = workbook
            .worksheet_range(name)
            .map_err(|e| format!("failed to read sheet {}: {}", name, e))?;

        let rows: Vec<String> = range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .filter(|line| !line.replace('|', "").trim().is_empty())
            .collect();

        if rows.is_empty() {
            continue;
        }
        segments.push(RawSegment::new(
            index,
            format!("Sheet: {}\n{}", name, rows.join("\n")),
        ));
    }
    Ok(segments)
}
