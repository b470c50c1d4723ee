//! Attachment extraction.
//!
//! Turns one uploaded blob into exactly one [`AttachmentContent`]: an inline
//! base64 image for vision input, or marker-wrapped plain text. Extraction is
//! total. Parse failures, empty documents, unknown formats, and missing blobs
//! all become explicit text markers, reported as [`Graceful::Defaulted`] so
//! the caller can log them.
//!
//! Dispatch order: image, PDF, Word (`.docx`), spreadsheet (`.xlsx`), text-like,
//! then the unsupported marker.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use chathome_core::context::AttachmentContent;
use chathome_core::Graceful;

use crate::blob::BlobStore;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to render from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to render per sheet, counting the empty cells that pad a
/// row out to a referenced column.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Widest column a worksheet can address (`XFD`).
const XLSX_MAX_COLUMNS: usize = 16_384;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif", "heic", "heif",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "csv", "xml", "html", "css", "js", "ts", "tsx", "jsx", "py", "yaml", "yml",
    "rtf", "log", "ini", "cfg", "conf", "sh", "bash", "sql", "java", "c", "cpp", "h", "hpp", "cs",
    "go", "rs", "php", "rb", "swift", "kt",
];

/// Which extraction path an attachment takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Pdf,
    Word,
    Spreadsheet,
    Text,
    Unsupported,
}

/// Errors from the binary-format extractors. Always turned into markers.
#[derive(Debug)]
enum ExtractError {
    Pdf(String),
    Ooxml(String),
    MissingPart(&'static str),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
            ExtractError::MissingPart(p) => write!(f, "{} not found", p),
        }
    }
}

fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Decide the extraction path from declared content type and file name.
pub fn classify(name: &str, content_type: &str) -> AttachmentKind {
    let ext = extension(name);
    let ct = content_type.trim().to_ascii_lowercase();

    if ct.starts_with("image/") || IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        AttachmentKind::Image
    } else if ct == MIME_PDF || ext == "pdf" {
        AttachmentKind::Pdf
    } else if ct == MIME_DOCX || ext == "docx" {
        AttachmentKind::Word
    } else if ct.contains("spreadsheet") || ext == "xlsx" || ext == "xls" {
        AttachmentKind::Spreadsheet
    } else if ct.starts_with("text/") || TEXT_EXTENSIONS.contains(&ext.as_str()) {
        AttachmentKind::Text
    } else {
        AttachmentKind::Unsupported
    }
}

fn text_block(header: &str, body: &str, footer: &str) -> AttachmentContent {
    AttachmentContent::Text {
        text: format!("{}\n{}\n{}", header, body, footer),
    }
}

/// Marker used when the blob behind a key cannot be read.
pub fn unreadable_marker(name: &str) -> AttachmentContent {
    text_block(&format!("[File: {}]", name), "(File could not be read)", "[End of file]")
}

/// Extract one attachment from its bytes. Never fails.
pub fn extract_attachment(
    name: &str,
    content_type: &str,
    bytes: &[u8],
) -> Graceful<AttachmentContent> {
    match classify(name, content_type) {
        AttachmentKind::Image => Graceful::Produced(inline_image(name, content_type, bytes)),
        AttachmentKind::Pdf => extract_pdf_block(name, bytes),
        AttachmentKind::Word => extract_docx_block(name, bytes),
        AttachmentKind::Spreadsheet => extract_xlsx_block(name, bytes),
        AttachmentKind::Text => Graceful::Produced(text_block(
            &format!("[File: {}]", name),
            &String::from_utf8_lossy(bytes),
            "[End of file]",
        )),
        AttachmentKind::Unsupported => {
            let declared = if !content_type.trim().is_empty() {
                content_type.trim().to_string()
            } else {
                let ext = extension(name);
                if ext.is_empty() {
                    "unknown".to_string()
                } else {
                    ext
                }
            };
            Graceful::defaulted(
                text_block(
                    &format!("[File: {}]", name),
                    &format!("(Unsupported file type: {}. Cannot extract content.)", declared),
                    "[End of file]",
                ),
                format!("unsupported file type {}", declared),
            )
        }
    }
}

fn inline_image(name: &str, content_type: &str, bytes: &[u8]) -> AttachmentContent {
    let ct = content_type.trim();
    let mime = if ct.to_ascii_lowercase().starts_with("image/") {
        ct.to_string()
    } else {
        match extension(name).as_str() {
            "jpg" => "image/jpeg".to_string(),
            ext => format!("image/{}", ext),
        }
    };
    AttachmentContent::InlineImage {
        data_uri: format!("data:{};base64,{}", mime, STANDARD.encode(bytes)),
    }
}

fn extract_pdf_block(name: &str, bytes: &[u8]) -> Graceful<AttachmentContent> {
    let header = format!("[PDF Document: {}]", name);
    const FOOTER: &str = "[End of PDF]";
    match extract_pdf(bytes) {
        Ok(text) if !text.trim().is_empty() => {
            Graceful::Produced(text_block(&header, text.trim(), FOOTER))
        }
        Ok(_) => Graceful::defaulted(
            text_block(
                &header,
                "(Could not extract text - PDF may be scanned/image-based)",
                FOOTER,
            ),
            "PDF produced no text",
        ),
        Err(e) => Graceful::defaulted(
            text_block(&header, "(Failed to extract text from PDF)", FOOTER),
            e.to_string(),
        ),
    }
}

fn extract_docx_block(name: &str, bytes: &[u8]) -> Graceful<AttachmentContent> {
    let header = format!("[Word Document: {}]", name);
    const FOOTER: &str = "[End of Document]";
    match extract_docx(bytes) {
        Ok(text) if !text.trim().is_empty() => {
            Graceful::Produced(text_block(&header, text.trim(), FOOTER))
        }
        Ok(_) => Graceful::defaulted(
            text_block(&header, "(Document appears to be empty)", FOOTER),
            "Word document is empty",
        ),
        Err(e @ ExtractError::MissingPart(_)) => Graceful::defaulted(
            text_block(&header, "(Could not find document content)", FOOTER),
            e.to_string(),
        ),
        Err(e) => Graceful::defaulted(
            text_block(&header, "(Failed to extract text from Word document)", FOOTER),
            e.to_string(),
        ),
    }
}

fn extract_xlsx_block(name: &str, bytes: &[u8]) -> Graceful<AttachmentContent> {
    let header = format!("[Excel Spreadsheet: {}]", name);
    match extract_xlsx(bytes) {
        Ok(sheets) => {
            let mut body = String::new();
            for (label, csv) in sheets {
                body.push_str(&format!("[Sheet: {}]\n{}\n\n", label, csv));
            }
            Graceful::Produced(AttachmentContent::Text {
                text: format!("{}\n{}[End of Spreadsheet]", header, body),
            })
        }
        Err(e) => Graceful::defaulted(
            text_block(
                &header,
                "(Failed to extract data from Excel file)",
                "[End of Spreadsheet]",
            ),
            e.to_string(),
        ),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
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

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    if archive.index_for_name("word/document.xml").is_none() {
        return Err(ExtractError::MissingPart("word/document.xml"));
    }
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_w_t_elements(&doc_xml)
}

/// Collect `w:t` runs, breaking lines at paragraph ends and `w:br`.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(collapse_blank_lines(&out))
}

fn collapse_blank_lines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0;
    for line in s.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim().to_string()
}

/// Render every sheet as `(label, csv)` in workbook order.
fn extract_xlsx(bytes: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = list_sheets(&mut archive)?;
    let mut out = Vec::new();
    for (label, path) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &path, MAX_XML_ENTRY_BYTES)?;
        out.push((label, sheet_to_csv(&sheet_xml, &shared_strings)?));
    }
    Ok(out)
}

/// One string per `<si>`, concatenating rich-text runs.
fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet labels from `xl/workbook.xml`, resolved to part paths through the
/// workbook relationships. Falls back to `sheetN.xml` order when the workbook
/// part is absent.
fn list_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    if archive.index_for_name("xl/workbook.xml").is_some()
        && archive.index_for_name("xl/_rels/workbook.xml.rels").is_some()
    {
        let rels_xml =
            read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
        let targets = parse_relationships(&rels_xml)?;
        let wb_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
        let mut sheets = Vec::new();
        let mut reader = quick_xml::Reader::from_reader(wb_xml.as_slice());
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                    let label = attr_value(&e, b"name").unwrap_or_default();
                    if let Some(target) = attr_value(&e, b"id").and_then(|id| targets.get(&id)) {
                        let path = match target.strip_prefix('/') {
                            Some(abs) => abs.to_string(),
                            None => format!("xl/{}", target),
                        };
                        if archive.index_for_name(&path).is_some() {
                            sheets.push((label, path));
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
                _ => {}
            }
            buf.clear();
        }
        if !sheets.is_empty() {
            return Ok(sheets);
        }
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    if names.is_empty() {
        return Err(ExtractError::MissingPart("xl/worksheets"));
    }
    Ok(names
        .into_iter()
        .enumerate()
        .map(|(i, path)| (format!("Sheet{}", i + 1), path))
        .collect())
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut out = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(&e, b"Id"), attr_value(&e, b"Target"))
                {
                    out.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Zero-based column index from a cell reference such as `AB12`. `None` when
/// the reference has no column letters or lies past `XFD`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut idx = 0usize;
    let mut letters = 0usize;
    for c in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        idx = idx.checked_mul(26)?.checked_add(digit)?;
        if idx > XLSX_MAX_COLUMNS {
            return None;
        }
        letters += 1;
    }
    if letters == 0 {
        return None;
    }
    Some(idx - 1)
}

/// Where a `<c>` element lands: its referenced column, the next free column
/// when it carries no reference, or nowhere when the reference is out of range.
fn cell_column(cell_ref: Option<&str>, next: usize) -> Option<usize> {
    match cell_ref {
        Some(r) if r.starts_with(|c: char| c.is_ascii_alphabetic()) => column_index(r),
        _ => Some(next),
    }
}

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render one worksheet as CSV, placing cells by their column reference.
fn sheet_to_csv(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut cell_col: Option<usize> = None;
    let mut cell_type = String::new();
    let mut cell_value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    let next = row.as_ref().map(|r| r.len()).unwrap_or(0);
                    cell_col = cell_column(attr_value(&e, b"r").as_deref(), next);
                    cell_type = attr_value(&e, b"t").unwrap_or_default();
                    cell_value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Ok(Event::Text(te)) if in_value => {
                cell_value.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let rendered = match cell_type.as_str() {
                        "s" => cell_value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        "b" => match cell_value.trim() {
                            "1" => "TRUE".to_string(),
                            "0" => "FALSE".to_string(),
                            other => other.to_string(),
                        },
                        _ => cell_value.clone(),
                    };
                    if let (Some(r), Some(col)) = (row.as_mut(), cell_col) {
                        let grow = (col + 1).saturating_sub(r.len());
                        if cell_count + grow > XLSX_MAX_CELLS_PER_SHEET {
                            break;
                        }
                        if grow > 0 {
                            r.resize(col + 1, String::new());
                        }
                        r[col] = rendered;
                        cell_count += grow.max(1);
                    } else {
                        cell_count += 1;
                    }
                }
                b"row" => rows.extend(row.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    // A row cut off by the cell cap still counts.
    rows.extend(row.take());

    Ok(rows
        .iter()
        .map(|r| r.iter().map(|v| csv_field(v)).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Fetches attachment blobs and runs extraction off the async runtime.
#[derive(Clone)]
pub struct AttachmentExtractor {
    blobs: Arc<dyn BlobStore>,
}

impl AttachmentExtractor {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Extract the attachment stored under `key`. Never fails.
    pub async fn extract(&self, key: &str) -> Graceful<AttachmentContent> {
        let fallback_name = key.rsplit('/').next().unwrap_or(key).to_string();
        let blob = match self.blobs.get(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                warn!(key, "attachment blob missing");
                return Graceful::defaulted(unreadable_marker(&fallback_name), "blob missing");
            }
            Err(e) => {
                warn!(key, error = %e, "attachment blob read failed");
                return Graceful::defaulted(unreadable_marker(&fallback_name), e.to_string());
            }
        };

        let name = blob.info.name.clone();
        let content_type = blob.info.content_type.clone();
        let bytes = blob.bytes;
        let result = tokio::task::spawn_blocking({
            let name = name.clone();
            move || extract_attachment(&name, &content_type, &bytes)
        })
        .await;

        match result {
            Ok(extracted) => {
                if let Some(reason) = extracted.reason() {
                    warn!(key, reason, "attachment extraction degraded");
                }
                extracted
            }
            Err(e) => {
                // Parser panicked; report it like any other extraction failure.
                warn!(key, error = %e, "attachment extraction task failed");
                Graceful::defaulted(unreadable_marker(&name), e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn text_of(g: Graceful<AttachmentContent>) -> String {
        match g.into_value() {
            AttachmentContent::Text { text } => text,
            other => panic!("expected text, got {:?}", other),
        }
    }

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zw.start_file(*name, opts).unwrap();
                zw.write_all(body.as_bytes()).unwrap();
            }
            zw.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn classification_priority() {
        assert_eq!(classify("photo.JPG", ""), AttachmentKind::Image);
        assert_eq!(classify("blob", "image/webp"), AttachmentKind::Image);
        assert_eq!(classify("a.pdf", "application/octet-stream"), AttachmentKind::Pdf);
        assert_eq!(classify("a.bin", MIME_DOCX), AttachmentKind::Word);
        assert_eq!(classify("a.xls", ""), AttachmentKind::Spreadsheet);
        assert_eq!(classify("main.rs", ""), AttachmentKind::Text);
        assert_eq!(classify("notes", "text/markdown"), AttachmentKind::Text);
        assert_eq!(classify("setup.exe", "application/x-msdownload"), AttachmentKind::Unsupported);
    }

    #[test]
    fn image_becomes_data_uri() {
        let g = extract_attachment("cat.jpg", "", &[1, 2, 3]);
        assert!(!g.is_defaulted());
        assert_eq!(
            g.into_value(),
            AttachmentContent::InlineImage {
                data_uri: "data:image/jpeg;base64,AQID".into()
            }
        );
        let g = extract_attachment("x.png", "image/png", &[1, 2, 3]);
        assert!(matches!(g.into_value(), AttachmentContent::InlineImage { data_uri } if data_uri.starts_with("data:image/png;base64,")));
    }

    #[test]
    fn text_files_are_wrapped_verbatim() {
        let text = text_of(extract_attachment("notes.md", "", b"# Title\nbody"));
        assert_eq!(text, "[File: notes.md]\n# Title\nbody\n[End of file]");
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let text = text_of(extract_attachment("a.txt", "text/plain", &[b'o', b'k', 0xff]));
        assert!(text.contains("ok\u{FFFD}"));
    }

    #[test]
    fn unsupported_type_gets_marker() {
        let g = extract_attachment("setup.exe", "application/x-msdownload", b"MZ");
        assert!(g.is_defaulted());
        assert_eq!(
            text_of(g),
            "[File: setup.exe]\n(Unsupported file type: application/x-msdownload. Cannot extract content.)\n[End of file]"
        );
        let text = text_of(extract_attachment("setup.exe", "", b"MZ"));
        assert!(text.contains("(Unsupported file type: exe."));
    }

    #[test]
    fn invalid_pdf_gets_failure_marker() {
        let g = extract_attachment("scan.pdf", MIME_PDF, b"not a pdf");
        assert!(g.is_defaulted());
        assert_eq!(
            text_of(g),
            "[PDF Document: scan.pdf]\n(Failed to extract text from PDF)\n[End of PDF]"
        );
    }

    #[test]
    fn invalid_zip_gets_word_failure_marker() {
        let text = text_of(extract_attachment("a.docx", MIME_DOCX, b"not a zip"));
        assert!(text.contains("(Failed to extract text from Word document)"));
    }

    #[test]
    fn docx_without_document_part() {
        let bytes = zip_with(&[("word/styles.xml", "<styles/>")]);
        let text = text_of(extract_attachment("a.docx", MIME_DOCX, &bytes));
        assert!(text.contains("(Could not find document content)"));
    }

    #[test]
    fn docx_paragraphs_and_entities() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world &amp; co</w:t></w:r></w:p>
<w:p><w:r><w:t>Second</w:t><w:br/><w:t>line</w:t></w:r></w:p>
</w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = text_of(extract_attachment("memo.docx", "", &bytes));
        assert_eq!(
            text,
            "[Word Document: memo.docx]\nHello world & co\nSecond\nline\n[End of Document]"
        );
    }

    #[test]
    fn empty_docx_is_flagged() {
        let doc = r#"<w:document xmlns:w="x"><w:body><w:p/></w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = text_of(extract_attachment("blank.docx", "", &bytes));
        assert!(text.contains("(Document appears to be empty)"));
    }

    #[test]
    fn xlsx_sheets_render_as_labeled_csv() {
        let workbook = r#"<workbook xmlns="m" xmlns:r="r"><sheets>
<sheet name="Budget" sheetId="1" r:id="rId1"/><sheet name="Notes" sheetId="2" r:id="rId2"/>
</sheets></workbook>"#;
        let rels = r#"<Relationships xmlns="p">
<Relationship Id="rId1" Type="ws" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="ws" Target="worksheets/sheet2.xml"/>
</Relationships>"#;
        let shared = r#"<sst><si><t>Item</t></si><si><r><t>Co</t></r><r><t>st</t></r></si><si><t>Rent, flat</t></si></sst>"#;
        let sheet1 = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="C2"><v>1200</v></c></row>
</sheetData></worksheet>"#;
        let sheet2 = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>ok</t></is></c><c r="B1" t="b"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet1),
            ("xl/worksheets/sheet2.xml", sheet2),
        ]);
        let text = text_of(extract_attachment("budget.xlsx", MIME_XLSX, &bytes));
        assert_eq!(
            text,
            "[Excel Spreadsheet: budget.xlsx]\n\
             [Sheet: Budget]\nItem,Cost\n\"Rent, flat\",,1200\n\n\
             [Sheet: Notes]\nok,TRUE\n\n\
             [End of Spreadsheet]"
        );
    }

    #[test]
    fn broken_xlsx_gets_failure_marker() {
        let text = text_of(extract_attachment("a.xlsx", "", b"nope"));
        assert_eq!(
            text,
            "[Excel Spreadsheet: a.xlsx]\n(Failed to extract data from Excel file)\n[End of Spreadsheet]"
        );
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
        assert_eq!(column_index("XFD1"), Some(16_383));
        assert_eq!(column_index("XFE1"), None);
        assert_eq!(column_index("ZZZZZZZZZZZZZZZZ1"), None);
    }

    #[test]
    fn out_of_range_cell_reference_is_dropped() {
        let xml = br#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c><c r="ZZZZZZZZ1"><v>2</v></c><c><v>3</v></c></row></sheetData></worksheet>"#;
        assert_eq!(sheet_to_csv(xml, &[]).unwrap(), "1,3");
    }

    #[test]
    fn padding_to_far_columns_counts_against_cell_cap() {
        let mut xml = String::from("<worksheet><sheetData>");
        for n in 1..=50 {
            xml.push_str(&format!(r#"<row r="{n}"><c r="XFD{n}"><v>x</v></c></row>"#));
        }
        xml.push_str("</sheetData></worksheet>");
        let csv = sheet_to_csv(xml.as_bytes(), &[]).unwrap();
        let rows = csv.lines().count();
        assert!(rows * XLSX_MAX_COLUMNS <= XLSX_MAX_CELLS_PER_SHEET + XLSX_MAX_COLUMNS);
        assert!(rows < 50);
    }

    #[tokio::test]
    async fn missing_blob_yields_unreadable_marker() {
        let blobs = Arc::new(crate::blob::MemoryBlobStore::new());
        let extractor = AttachmentExtractor::new(blobs);
        let g = extractor.extract("u1/123-gone.txt").await;
        assert!(g.is_defaulted());
        assert_eq!(
            text_of(g),
            "[File: 123-gone.txt]\n(File could not be read)\n[End of file]"
        );
    }

    #[tokio::test]
    async fn extractor_uses_stored_name() {
        let blobs = Arc::new(crate::blob::MemoryBlobStore::new());
        blobs
            .put("u1/9-data.csv", "data.csv", "text/csv", b"a,b")
            .await
            .unwrap();
        let extractor = AttachmentExtractor::new(blobs);
        let text = text_of(extractor.extract("u1/9-data.csv").await);
        assert_eq!(text, "[File: data.csv]\na,b\n[End of file]");
    }
}
