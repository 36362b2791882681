//! Per-format text extraction for uploaded files.
//!
//! Each [`FileKind`] has exactly one [`FormatExtractor`]; [`FileKind::extractor`]
//! is the only dispatch point. Extractors read a staged file from disk and
//! return zero or more [`Document`]s. They never panic on malformed input
//! that the underlying library reports as an error; the ingestion pipeline
//! additionally isolates each extraction on a blocking task.

use std::io::Read;
use std::path::Path;

use calamine::Reader;
use thiserror::Error;

use crate::models::{Document, FileKind};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum spreadsheet records rendered into text, header row excluded.
/// Longer sheets are truncated with a warning.
const EXCEL_MAX_ROWS: usize = 100_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("text is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Turns one staged file into documents.
pub trait FormatExtractor: Send + Sync {
    /// `source` is the original upload name recorded in metadata; `path`
    /// is where the bytes currently live.
    fn extract(&self, source: &str, path: &Path) -> Result<Vec<Document>, ExtractError>;
}

pub struct ExcelExtractor;
pub struct PdfExtractor;
pub struct WordExtractor;
pub struct TextExtractor;

impl FileKind {
    pub fn extractor(&self) -> &'static dyn FormatExtractor {
        match self {
            FileKind::Excel => &ExcelExtractor,
            FileKind::Pdf => &PdfExtractor,
            FileKind::Word => &WordExtractor,
            FileKind::Text => &TextExtractor,
        }
    }
}

/// Drop documents with no visible text; they would only produce empty chunks.
fn non_blank(docs: Vec<Document>) -> Vec<Document> {
    docs.into_iter()
        .filter(|d| !d.content.trim().is_empty())
        .collect()
}

// ============ Excel ============

impl FormatExtractor for ExcelExtractor {
    fn extract(&self, source: &str, path: &Path) -> Result<Vec<Document>, ExtractError> {
        let mut workbook = calamine::open_workbook_auto(path)
            .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;
        let first = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ExtractError::Spreadsheet("workbook has no sheets".to_string()))?;
        let range = workbook
            .worksheet_range(&first)
            .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

        let (rows, total) = cap_rows(range.rows(), EXCEL_MAX_ROWS);
        if total > rows.len() {
            tracing::warn!(
                file = %source,
                rows = total.saturating_sub(1),
                kept = EXCEL_MAX_ROWS,
                "spreadsheet truncated"
            );
        }

        let text = render_table(&rows);
        Ok(non_blank(vec![Document::new(text, source, FileKind::Excel)]))
    }
}

/// The header plus at most `max_records` rows as text, and how many rows the
/// sheet had in total (header included).
fn cap_rows<'a>(
    rows: impl Iterator<Item = &'a [calamine::Data]>,
    max_records: usize,
) -> (Vec<Vec<String>>, usize) {
    let mut kept = Vec::new();
    let mut total = 0;
    for row in rows {
        if total <= max_records {
            kept.push(row.iter().map(cell_text).collect());
        }
        total += 1;
    }
    (kept, total)
}

fn cell_text(cell: &calamine::Data) -> String {
    match cell {
        calamine::Data::Empty => String::new(),
        calamine::Data::String(s) => s.clone(),
        calamine::Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        calamine::Data::Int(i) => i.to_string(),
        calamine::Data::Bool(b) => b.to_string(),
        calamine::Data::DateTime(dt) => dt.to_string(),
        calamine::Data::DateTimeIso(s) | calamine::Data::DurationIso(s) => s.clone(),
        _ => String::new(),
    }
}

/// Render rows as an aligned text table: the first row is the header, every
/// following row is prefixed with its 0-based record index, missing values
/// show as `NaN` and unnamed header cells as `Unnamed: <col>`.
fn render_table(rows: &[Vec<String>]) -> String {
    let Some((header, records)) = rows.split_first() else {
        return String::new();
    };
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let header: Vec<String> = (0..width)
        .map(|i| match header.get(i) {
            Some(h) if !h.trim().is_empty() => h.trim().to_string(),
            _ => format!("Unnamed: {}", i),
        })
        .collect();
    let records: Vec<Vec<String>> = records
        .iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .map(|r| {
            (0..width)
                .map(|i| match r.get(i) {
                    Some(c) if !c.trim().is_empty() => c.trim().to_string(),
                    _ => "NaN".to_string(),
                })
                .collect()
        })
        .collect();

    let index_width = records.len().saturating_sub(1).to_string().len();
    let col_widths: Vec<usize> = (0..width)
        .map(|i| {
            records
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(header[i].chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    out.push_str(&" ".repeat(index_width));
    for (h, w) in header.iter().zip(&col_widths) {
        out.push_str(&format!("  {:>w$}", h, w = *w));
    }
    for (n, record) in records.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("{:<w$}", n, w = index_width));
        for (c, w) in record.iter().zip(&col_widths) {
            out.push_str(&format!("  {:>w$}", c, w = *w));
        }
    }
    out
}

// ============ PDF ============

impl FormatExtractor for PdfExtractor {
    fn extract(&self, source: &str, path: &Path) -> Result<Vec<Document>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let pages = pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let docs = pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Document::new(text, source, FileKind::Pdf).with_page(i as u32))
            .collect();
        Ok(non_blank(docs))
    }
}

// ============ Word ============

impl FormatExtractor for WordExtractor {
    fn extract(&self, source: &str, path: &Path) -> Result<Vec<Document>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
            .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let text = extract_paragraphs(&xml)?;
        Ok(non_blank(vec![Document::new(text, source, FileKind::Word)]))
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
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

/// Collect `<w:t>` runs, one paragraph (`<w:p>`) per blank-line separated block.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
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
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

// ============ Text ============

impl FormatExtractor for TextExtractor {
    fn extract(&self, source: &str, path: &Path) -> Result<Vec<Document>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes)?;
        Ok(non_blank(vec![Document::new(text, source, FileKind::Text)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn text_file_yields_one_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "scratch.txt", b"hello there");
        let docs = TextExtractor.extract("notes.txt", &path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "hello there");
        assert_eq!(docs[0].metadata.source, "notes.txt");
        assert_eq!(docs[0].metadata.kind, FileKind::Text);
    }

    #[test]
    fn invalid_utf8_text_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "bad.txt", &[0xff, 0xfe, 0x00, 0xc3]);
        let err = TextExtractor.extract("bad.txt", &path).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding(_)));
    }

    #[test]
    fn blank_text_yields_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "blank.txt", b"  \n\n ");
        assert!(TextExtractor.extract("blank.txt", &path).unwrap().is_empty());
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "x.pdf", b"not a pdf");
        let err = PdfExtractor.extract("x.pdf", &path).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "x.docx", b"not a zip");
        let err = WordExtractor.extract("x.docx", &path).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn invalid_workbook_returns_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "x.xlsx", b"not a workbook");
        let err = ExcelExtractor.extract("x.xlsx", &path).unwrap_err();
        assert!(matches!(err, ExtractError::Spreadsheet(_)));
    }

    #[test]
    fn docx_paragraphs_are_blank_line_separated() {
        let dir = tempfile::TempDir::new().unwrap();
        let bytes = docx_with_paragraphs(&["First paragraph.", "Second &amp; last."]);
        let path = write_tmp(&dir, "memo.docx", &bytes);
        let docs = WordExtractor.extract("memo.docx", &path).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "First paragraph.\n\nSecond & last.");
        assert_eq!(docs[0].metadata.kind, FileKind::Word);
    }

    #[test]
    fn dispatch_covers_every_kind() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_tmp(&dir, "a.txt", b"dispatch");
        let docs = FileKind::Text.extractor().extract("a.txt", &path).unwrap();
        assert_eq!(docs[0].content, "dispatch");
    }

    #[test]
    fn table_rendering_aligns_columns() {
        let rows = vec![
            vec!["Item".to_string(), "Price".to_string()],
            vec!["Apple".to_string(), "3".to_string()],
            vec!["Kiwi".to_string(), String::new()],
        ];
        let text = render_table(&rows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "    Item  Price");
        assert_eq!(lines[1], "0  Apple      3");
        assert_eq!(lines[2], "1   Kiwi    NaN");
    }

    #[test]
    fn table_rendering_names_blank_headers() {
        let rows = vec![
            vec![String::new(), "Qty".to_string()],
            vec!["a".to_string(), "1".to_string()],
        ];
        let text = render_table(&rows);
        assert!(text.starts_with("   Unnamed: 0  Qty"));
    }

    #[test]
    fn long_sheets_are_capped_after_the_header() {
        let sheet: Vec<Vec<calamine::Data>> = (0..6)
            .map(|i| vec![calamine::Data::Int(i)])
            .collect();
        let (rows, total) = cap_rows(sheet.iter().map(Vec::as_slice), 3);
        assert_eq!(total, 6);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec!["0".to_string()]);
        assert_eq!(rows[3], vec!["3".to_string()]);

        let (rows, total) = cap_rows(sheet.iter().map(Vec::as_slice), 10);
        assert_eq!((rows.len(), total), (6, 6));
    }

    #[test]
    fn empty_table_renders_nothing() {
        assert_eq!(render_table(&[]), "");
        assert_eq!(render_table(&[vec![]]), "");
    }
}
