//! Text extraction from uploaded bytes, dispatched on the file extension.

use std::io::Read;

use quick_xml::events::Event;
use tracing::debug;

use kbase_core::{Error, Result};

/// Uploads need at least this many non-whitespace chars of readable text.
pub const MIN_TEXT_CHARS: usize = 10;

/// Decompressed bytes read from one OOXML part at most.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Supported file types for text extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    PlainText,
    Markdown,
    Code,
    Json,
    Csv,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Unknown,
}

impl FileType {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "txt" | "log" => Self::PlainText,
            "md" | "mdx" | "rst" => Self::Markdown,
            "py" | "js" | "ts" | "rs" | "go" | "java" | "c" | "h" | "cpp" | "sh" | "sql"
            | "yaml" | "yml" | "toml" | "ini" | "xml" | "html" | "htm" | "css" => Self::Code,
            "json" => Self::Json,
            "csv" | "tsv" => Self::Csv,
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "pptx" => Self::Pptx,
            "xlsx" => Self::Xlsx,
            _ => Self::Unknown,
        }
    }

    pub fn from_filename(filename: &str) -> Self {
        Self::from_extension(&extension(filename).unwrap_or_default())
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::PlainText | Self::Code => "text/plain; charset=utf-8",
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Pdf => "application/pdf",
            Self::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Self::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Unknown => "application/octet-stream",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self,
            Self::PlainText | Self::Markdown | Self::Code | Self::Json | Self::Csv
        )
    }
}

/// Lowercased extension without the dot.
pub fn extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Extracted text plus the char offsets where pages 2.. begin (PDF only).
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    pub page_starts: Vec<usize>,
}

impl ExtractedText {
    fn plain(text: String) -> Self {
        Self {
            text,
            page_starts: Vec::new(),
        }
    }

    /// 1-based page of a char offset, when page boundaries are known.
    pub fn page_of(&self, char_offset: usize) -> Option<i64> {
        if self.page_starts.is_empty() {
            return None;
        }
        let before = self.page_starts.iter().filter(|&&s| s <= char_offset).count();
        Some(before as i64 + 1)
    }
}

/// Extract readable text. Unreadable or near-empty documents are `InvalidInput`.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<ExtractedText> {
    let file_type = FileType::from_filename(filename);
    let extracted = match file_type {
        t if t.is_text() => ExtractedText::plain(decode_utf8(filename, bytes)?),
        FileType::Pdf => extract_pdf(bytes)?,
        FileType::Docx => ExtractedText::plain(extract_docx(bytes)?),
        FileType::Pptx => ExtractedText::plain(extract_pptx(bytes)?),
        FileType::Xlsx => ExtractedText::plain(extract_xlsx(bytes)?),
        _ => {
            // Unknown extension: accept it only if it decodes as mostly printable text.
            let text = decode_utf8(filename, bytes)?;
            let control = text
                .chars()
                .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
                .count();
            if control > text.chars().count() / 10 {
                return Err(unreadable(filename));
            }
            ExtractedText::plain(text)
        }
    };

    let visible = extracted.text.chars().filter(|c| !c.is_whitespace()).count();
    if visible < MIN_TEXT_CHARS {
        return Err(Error::invalid(format!(
            "cannot read document text from '{}'; scanned or empty files are not supported",
            filename
        )));
    }
    debug!("Extracted {} chars from {} ({:?})", visible, filename, file_type);
    Ok(extracted)
}

fn unreadable(filename: &str) -> Error {
    Error::invalid(format!("'{}' is not a readable document", filename))
}

fn decode_utf8(filename: &str, bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| unreadable(filename))
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::invalid(format!("PDF extraction failed: {}", e)))?;

    // Pages come back separated by form feeds.
    let mut text = String::with_capacity(raw.len());
    let mut page_starts = Vec::new();
    let mut count = 0usize;
    for c in raw.chars() {
        if c == '\u{c}' {
            page_starts.push(count);
            text.push('\n');
        } else {
            text.push(c);
        }
        count += 1;
    }
    if text.trim_end().chars().count() <= page_starts.last().copied().unwrap_or(0) {
        page_starts.pop();
    }
    Ok(ExtractedText { text, page_starts })
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::invalid(format!("not an OOXML document: {}", e)))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::invalid(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::invalid(format!("{} exceeds the size limit", name)));
    }
    Ok(out)
}

/// Entries `{prefix}N.xml` in numeric order.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(String::from)
        .collect();
    names.sort_by_key(|n| {
        n.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Text of every `<*:t>` element; `<*:p>` ends a paragraph.
fn text_elements(xml: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(t)) if in_t => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::invalid(format!("bad XML text: {}", e)))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::invalid(format!("bad XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    text_elements(&read_entry(&mut archive, "word/document.xml")?)
}

fn extract_pptx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let mut out = String::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        out.push_str(&text_elements(&read_entry(&mut archive, &name)?)?);
        out.push('\n');
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let shared: Vec<String> = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => text_elements(&xml)?.lines().map(String::from).collect(),
        Err(_) => Vec::new(),
    };

    let mut rows = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet") {
        let xml = read_entry(&mut archive, &name)?;
        rows.extend(sheet_rows(&xml, &shared)?);
    }
    Ok(rows.join("\n"))
}

/// One tab-joined line per `<row>`; shared-string cells are resolved.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t
                    .unescape()
                    .map_err(|e| Error::invalid(format!("bad XML text: {}", e)))?;
                let value = raw.trim();
                let cell = if shared_cell {
                    value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned())
                        .unwrap_or_default()
                } else {
                    value.to_string()
                };
                if !cell.is_empty() {
                    row.push(cell);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::invalid(format!("bad XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ooxml(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_filename("Handbook.PDF"), FileType::Pdf);
        assert_eq!(FileType::from_filename("notes.md"), FileType::Markdown);
        assert_eq!(FileType::from_filename("report.docx"), FileType::Docx);
        assert_eq!(FileType::from_filename("README"), FileType::Unknown);
        assert_eq!(FileType::Pdf.mime_type(), "application/pdf");
        assert_eq!(FileType::Unknown.mime_type(), "application/octet-stream");
    }

    #[test]
    fn test_plain_text_and_bom() {
        let out = extract_text("a.txt", b"\xEF\xBB\xBFhello world").unwrap();
        assert_eq!(out.text, "hello world");
        assert!(out.page_of(3).is_none());
    }

    #[test]
    fn test_too_short_is_invalid() {
        let err = extract_text("a.txt", b"  tiny \n").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_binary_is_invalid() {
        let err = extract_text("blob.bin", &[0xff, 0xfe, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let err = extract_text("fake.pdf", b"not a pdf at all").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_docx_paragraphs() {
        let doc = ooxml(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Annual leave</w:t></w:r></w:p><w:p><w:r><w:t>is 20 days &amp; more</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let out = extract_text("policy.docx", &doc).unwrap();
        assert_eq!(out.text, "Annual leave\nis 20 days & more\n");
    }

    #[test]
    fn test_xlsx_rows_resolve_shared_strings() {
        let book = ooxml(&[
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>Name</t></si><si><t>Quota</t></si><si><t>Alice</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>0</v></c><c t="s"><v>1</v></c></row><row><c t="s"><v>2</v></c><c><v>20</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let out = extract_text("quota.xlsx", &book).unwrap();
        assert_eq!(out.text, "Name\tQuota\nAlice\t20");
    }

    #[test]
    fn test_page_of() {
        let out = ExtractedText {
            text: "x".repeat(30),
            page_starts: vec![10, 20],
        };
        assert_eq!(out.page_of(0), Some(1));
        assert_eq!(out.page_of(10), Some(2));
        assert_eq!(out.page_of(25), Some(3));
    }
}
