//! Text extraction for the file pipeline.
//!
//! Each extractor emits `(plain_text, DocumentStructure)`. The office
//! formats (DOCX/PPTX/XLSX) are ZIP containers read with a minimal
//! central-directory parser and inflated with `flate2`; PDF text is
//! salvaged from FlateDecode content streams by scanning the text-showing
//! operators. Extraction is best-effort text salvage -- the downstream
//! summarization stages tolerate imperfect segmentation by design.

use std::io::Read;

use serde::Serialize;
use thiserror::Error;

/// Upload size ceiling: 50 MiB.
pub const MAX_FILE_BYTES: usize = 50 * 1024 * 1024;

/// Extraction errors.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("malformed {0} content: {1}")]
    Malformed(&'static str, String),
    #[error("no text could be extracted")]
    NoText,
}

/// Supported file types, detected from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Pptx,
    Csv,
    Xlsx,
    Txt,
    Markdown,
    Json,
    Html,
}

impl FileType {
    /// Detect from a file name's extension.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit('.').next()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "pptx" => Some(Self::Pptx),
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            "txt" => Some(Self::Txt),
            "md" => Some(Self::Markdown),
            "json" => Some(Self::Json),
            "html" => Some(Self::Html),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Txt => "txt",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Html => "html",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type structural counts used for page estimation and metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentStructure {
    Pdf {
        total_pages: usize,
        page_lengths: Vec<usize>,
    },
    Docx {
        total_paragraphs: usize,
        paragraph_lengths: Vec<usize>,
        total_tables: usize,
    },
    Pptx {
        total_slides: usize,
        slide_lengths: Vec<usize>,
    },
    Spreadsheet {
        columns: Vec<String>,
        rows: usize,
    },
    Text {
        lines: usize,
        characters: usize,
    },
    Markdown {
        headers: Vec<String>,
        lines: usize,
        characters: usize,
    },
    Json {
        keys: Vec<String>,
        is_array: bool,
        size: usize,
    },
    Html {
        original_length: usize,
        cleaned_length: usize,
    },
}

impl DocumentStructure {
    /// Page count for chunk page estimation, where the format has pages.
    pub fn total_pages(&self) -> Option<usize> {
        match self {
            Self::Pdf { total_pages, .. } => Some(*total_pages),
            _ => None,
        }
    }
}

/// Extract `(plain_text, structure)` for one file.
pub fn extract_text(
    file_type: FileType,
    bytes: &[u8],
) -> Result<(String, DocumentStructure), ExtractError> {
    let (text, structure) = match file_type {
        FileType::Txt => extract_plain(bytes),
        FileType::Markdown => extract_markdown(bytes),
        FileType::Json => extract_json(bytes)?,
        FileType::Html => extract_html(bytes),
        FileType::Csv => extract_csv(bytes),
        FileType::Xlsx => extract_xlsx(bytes)?,
        FileType::Docx => extract_docx(bytes)?,
        FileType::Pptx => extract_pptx(bytes)?,
        FileType::Pdf => extract_pdf(bytes)?,
    };
    if text.trim().is_empty() {
        return Err(ExtractError::NoText);
    }
    Ok((text, structure))
}

fn extract_plain(bytes: &[u8]) -> (String, DocumentStructure) {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let structure = DocumentStructure::Text {
        lines: text.lines().count(),
        characters: text.chars().count(),
    };
    (text, structure)
}

fn extract_markdown(bytes: &[u8]) -> (String, DocumentStructure) {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let headers: Vec<String> = text
        .lines()
        .filter(|line| line.starts_with('#'))
        .map(ToOwned::to_owned)
        .collect();
    let structure = DocumentStructure::Markdown {
        headers,
        lines: text.lines().count(),
        characters: text.chars().count(),
    };
    (text, structure)
}

fn extract_json(bytes: &[u8]) -> Result<(String, DocumentStructure), ExtractError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ExtractError::Malformed("json", e.to_string()))?;
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| ExtractError::Malformed("json", e.to_string()))?;

    let keys = value
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default();
    let size = value
        .as_object()
        .map(serde_json::Map::len)
        .or_else(|| value.as_array().map(Vec::len))
        .unwrap_or(0);
    let structure = DocumentStructure::Json {
        keys,
        is_array: value.is_array(),
        size,
    };
    Ok((text, structure))
}

fn extract_html(bytes: &[u8]) -> (String, DocumentStructure) {
    let raw = String::from_utf8_lossy(bytes);
    let stripped = strip_markup(&raw);
    let cleaned = collapse_whitespace(&stripped);
    let structure = DocumentStructure::Html {
        original_length: raw.chars().count(),
        cleaned_length: cleaned.chars().count(),
    };
    (cleaned, structure)
}

fn extract_csv(bytes: &[u8]) -> (String, DocumentStructure) {
    let raw = String::from_utf8_lossy(bytes);
    let mut lines = raw.lines();
    let columns: Vec<String> = lines
        .next()
        .map(|header| header.split(',').map(|c| c.trim().to_owned()).collect())
        .unwrap_or_default();
    let rows = lines.count();

    let text = format!("Columns: {}\n\n{}", columns.join(", "), raw);
    let structure = DocumentStructure::Spreadsheet { columns, rows };
    (text, structure)
}

fn extract_xlsx(bytes: &[u8]) -> Result<(String, DocumentStructure), ExtractError> {
    let archive = ZipArchive::parse(bytes)?;
    let mut cells: Vec<String> = Vec::new();

    // Shared strings hold most cell text; inline strings live in sheets.
    if let Some(shared) = archive.file_ending_with("xl/sharedStrings.xml") {
        cells.extend(xml_tag_texts(&shared, "t"));
    }
    for name in archive.names_matching("xl/worksheets/") {
        if let Some(sheet) = archive.file_ending_with(&name) {
            cells.extend(xml_tag_texts(&sheet, "t"));
        }
    }

    let rows = cells.len();
    let text = cells.join("\n");
    Ok((
        text,
        DocumentStructure::Spreadsheet {
            columns: Vec::new(),
            rows,
        },
    ))
}

fn extract_docx(bytes: &[u8]) -> Result<(String, DocumentStructure), ExtractError> {
    let archive = ZipArchive::parse(bytes)?;
    let document = archive
        .file_ending_with("word/document.xml")
        .ok_or_else(|| ExtractError::Malformed("docx", "missing word/document.xml".to_owned()))?;

    let mut text = String::new();
    let mut paragraph_lengths = Vec::new();
    for paragraph in document.split("<w:p").skip(1) {
        let runs: String = xml_tag_texts(paragraph, "w:t").join("");
        let trimmed = runs.trim();
        if !trimmed.is_empty() {
            paragraph_lengths.push(trimmed.chars().count());
            text.push_str(trimmed);
            text.push('\n');
        }
    }
    let total_tables = document.matches("<w:tbl").count();

    // Headers and footers follow the body, as the document model orders them.
    for part in ["word/header", "word/footer"] {
        for name in archive.names_matching(part) {
            if let Some(content) = archive.file_ending_with(&name) {
                let runs: String = xml_tag_texts(&content, "w:t").join(" ");
                let trimmed = runs.trim();
                if !trimmed.is_empty() {
                    text.push_str(trimmed);
                    text.push('\n');
                }
            }
        }
    }

    let structure = DocumentStructure::Docx {
        total_paragraphs: paragraph_lengths.len(),
        paragraph_lengths,
        total_tables,
    };
    Ok((text.trim().to_owned(), structure))
}

fn extract_pptx(bytes: &[u8]) -> Result<(String, DocumentStructure), ExtractError> {
    let archive = ZipArchive::parse(bytes)?;
    let mut slide_names: Vec<String> = archive
        .names_matching("ppt/slides/slide")
        .into_iter()
        .filter(|n| n.ends_with(".xml"))
        .collect();
    slide_names.sort();

    let mut text = String::new();
    let mut slide_lengths = Vec::new();
    for (i, name) in slide_names.iter().enumerate() {
        let slide_number = i.saturating_add(1);
        let slide_text = archive
            .file_ending_with(name)
            .map(|content| xml_tag_texts(&content, "a:t").join("\n"))
            .unwrap_or_default();
        slide_lengths.push(slide_text.chars().count());
        text.push_str(&format!("\n--- Slide {slide_number} ---\n{slide_text}"));
    }

    let structure = DocumentStructure::Pptx {
        total_slides: slide_names.len(),
        slide_lengths,
    };
    Ok((text.trim().to_owned(), structure))
}

fn extract_pdf(bytes: &[u8]) -> Result<(String, DocumentStructure), ExtractError> {
    let total_pages = count_pdf_pages(bytes).max(1);

    let mut text = String::new();
    for stream in pdf_streams(bytes) {
        let content = match inflate(&stream) {
            Some(decoded) => decoded,
            // Content streams may be stored uncompressed.
            None => stream,
        };
        let content_str = String::from_utf8_lossy(&content);
        let salvaged = pdf_text_operators(&content_str);
        if !salvaged.is_empty() {
            text.push_str(&salvaged);
            text.push('\n');
        }
    }

    if text.trim().is_empty() {
        return Err(ExtractError::NoText);
    }

    let structure = DocumentStructure::Pdf {
        total_pages,
        page_lengths: Vec::new(),
    };
    Ok((text.trim().to_owned(), structure))
}

/// Count `/Type /Page` objects (excluding the `/Pages` tree node).
fn count_pdf_pages(bytes: &[u8]) -> usize {
    let haystack = String::from_utf8_lossy(bytes);
    let mut count = 0usize;
    for variant in ["/Type /Page", "/Type/Page"] {
        let mut search = 0usize;
        while let Some(pos) = haystack[search..].find(variant) {
            let absolute = search.saturating_add(pos).saturating_add(variant.len());
            // "/Type /Pages" must not count.
            if haystack.get(absolute..absolute.saturating_add(1)) != Some("s") {
                count = count.saturating_add(1);
            }
            search = absolute;
        }
        if count > 0 {
            break;
        }
    }
    count
}

/// Raw bytes of every `stream ... endstream` segment.
fn pdf_streams(bytes: &[u8]) -> Vec<Vec<u8>> {
    const START: &[u8] = b"stream";
    const END: &[u8] = b"endstream";
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while let Some(pos) = find_bytes(&bytes[cursor..], START) {
        let mut data_start = cursor.saturating_add(pos).saturating_add(START.len());
        // Skip the EOL after the `stream` keyword.
        while bytes.get(data_start) == Some(&b'\r') || bytes.get(data_start) == Some(&b'\n') {
            data_start = data_start.saturating_add(1);
        }
        match find_bytes(&bytes[data_start..], END) {
            Some(end_pos) => {
                let data_end = data_start.saturating_add(end_pos);
                out.push(bytes[data_start..data_end].to_vec());
                cursor = data_end.saturating_add(END.len());
            }
            None => break,
        }
    }
    out
}

/// Pull the strings shown by `Tj`/`TJ` operators out of decoded content.
fn pdf_text_operators(content: &str) -> String {
    let mut out = String::new();
    let mut chars = content.chars().peekable();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        if in_string {
            if escaped {
                match c {
                    'n' => current.push('\n'),
                    't' => current.push('\t'),
                    'r' | 'b' | 'f' => {}
                    other => current.push(other),
                }
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '(' {
                depth = depth.saturating_add(1);
                current.push(c);
            } else if c == ')' {
                if depth == 0 {
                    in_string = false;
                    // Keep the string only if a show operator follows soon.
                    let tail: String = chars.clone().take(8).collect();
                    let shows = tail.trim_start().starts_with("Tj")
                        || tail.trim_start().starts_with('\'')
                        || tail.contains("TJ")
                        || tail.trim_start().starts_with(']');
                    if shows || tail.trim_start().starts_with('(') {
                        out.push_str(&current);
                        if tail.trim_start().starts_with("Tj") || tail.trim_start().starts_with('\'')
                        {
                            out.push(' ');
                        }
                    }
                    current.clear();
                } else {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
            } else {
                current.push(c);
            }
        } else if c == '(' {
            in_string = true;
            depth = 0;
        }
    }
    collapse_whitespace(&out)
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// zlib-wrapped inflate (PDF FlateDecode).
fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

/// Raw-deflate inflate (ZIP entries).
fn inflate_raw(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = flate2::read::DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    Some(out)
}

// ── Minimal ZIP central-directory reader ──

const EOCD_SIGNATURE: &[u8] = &[0x50, 0x4b, 0x05, 0x06];
const CENTRAL_SIGNATURE: &[u8] = &[0x50, 0x4b, 0x01, 0x02];
const LOCAL_SIGNATURE: &[u8] = &[0x50, 0x4b, 0x03, 0x04];

struct ZipEntry {
    name: String,
    method: u16,
    compressed_size: usize,
    local_offset: usize,
}

/// Read-only view over a ZIP archive held in memory.
struct ZipArchive<'a> {
    bytes: &'a [u8],
    entries: Vec<ZipEntry>,
}

impl<'a> ZipArchive<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self, ExtractError> {
        let eocd = rfind_bytes(bytes, EOCD_SIGNATURE)
            .ok_or_else(|| ExtractError::Malformed("zip", "no end-of-central-directory".to_owned()))?;
        let entry_count = usize::from(read_u16(bytes, eocd.saturating_add(10))?);
        let cd_offset = read_offset(bytes, eocd.saturating_add(16))?;

        let mut entries = Vec::with_capacity(entry_count);
        let mut cursor = cd_offset;
        for _ in 0..entry_count {
            if bytes.get(cursor..cursor.saturating_add(4)) != Some(CENTRAL_SIGNATURE) {
                break;
            }
            let method = read_u16(bytes, cursor.saturating_add(10))?;
            let compressed_size = read_offset(bytes, cursor.saturating_add(20))?;
            let name_len = usize::from(read_u16(bytes, cursor.saturating_add(28))?);
            let extra_len = usize::from(read_u16(bytes, cursor.saturating_add(30))?);
            let comment_len = usize::from(read_u16(bytes, cursor.saturating_add(32))?);
            let local_offset = read_offset(bytes, cursor.saturating_add(42))?;

            let name_start = cursor.saturating_add(46);
            let name_end = name_start.saturating_add(name_len);
            let name = bytes
                .get(name_start..name_end)
                .map(|n| String::from_utf8_lossy(n).into_owned())
                .ok_or_else(|| {
                    ExtractError::Malformed("zip", "truncated central directory".to_owned())
                })?;

            entries.push(ZipEntry {
                name,
                method,
                compressed_size,
                local_offset,
            });
            cursor = name_end.saturating_add(extra_len).saturating_add(comment_len);
        }

        Ok(Self { bytes, entries })
    }

    /// Entry names starting with a prefix.
    fn names_matching(&self, prefix: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.name.starts_with(prefix))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Decompressed UTF-8 content of the entry whose name ends with `suffix`.
    fn file_ending_with(&self, suffix: &str) -> Option<String> {
        let entry = self.entries.iter().find(|e| e.name.ends_with(suffix))?;
        let data = self.entry_data(entry)?;
        Some(String::from_utf8_lossy(&data).into_owned())
    }

    fn entry_data(&self, entry: &ZipEntry) -> Option<Vec<u8>> {
        let local = entry.local_offset;
        if self.bytes.get(local..local.saturating_add(4)) != Some(LOCAL_SIGNATURE) {
            return None;
        }
        let name_len = usize::from(read_u16(self.bytes, local.saturating_add(26)).ok()?);
        let extra_len = usize::from(read_u16(self.bytes, local.saturating_add(28)).ok()?);
        let data_start = local
            .saturating_add(30)
            .saturating_add(name_len)
            .saturating_add(extra_len);
        let data = self
            .bytes
            .get(data_start..data_start.saturating_add(entry.compressed_size))?;

        match entry.method {
            0 => Some(data.to_vec()),
            8 => inflate_raw(data),
            _ => None,
        }
    }
}

fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len().saturating_sub(needle.len()))
        .rev()
        .find(|&i| &haystack[i..i.saturating_add(needle.len())] == needle)
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, ExtractError> {
    let slice = bytes
        .get(offset..offset.saturating_add(2))
        .ok_or_else(|| ExtractError::Malformed("zip", "truncated header".to_owned()))?;
    Ok(u16::from_le_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ExtractError> {
    let slice = bytes
        .get(offset..offset.saturating_add(4))
        .ok_or_else(|| ExtractError::Malformed("zip", "truncated header".to_owned()))?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// A u32 archive offset/size widened to usize.
fn read_offset(bytes: &[u8], offset: usize) -> Result<usize, ExtractError> {
    let value = read_u32(bytes, offset)?;
    usize::try_from(value)
        .map_err(|_| ExtractError::Malformed("zip", "offset exceeds address space".to_owned()))
}

// ── XML / HTML helpers ──

/// Text content of every `<tag>...</tag>` occurrence.
fn xml_tag_texts(xml: &str, tag: &str) -> Vec<String> {
    let open_exact = format!("<{tag}>");
    let open_attrs = format!("<{tag} ");
    let close = format!("</{tag}>");
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while cursor < xml.len() {
        let rest = &xml[cursor..];
        let open_pos = match (rest.find(&open_exact), rest.find(&open_attrs)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        let Some(open_pos) = open_pos else { break };
        let after_open = &rest[open_pos..];
        let Some(gt) = after_open.find('>') else { break };
        let content_start = open_pos.saturating_add(gt).saturating_add(1);
        let Some(close_pos) = rest[content_start..].find(&close) else {
            break;
        };
        let content = &rest[content_start..content_start.saturating_add(close_pos)];
        out.push(decode_entities(content));
        cursor = cursor
            .saturating_add(content_start)
            .saturating_add(close_pos)
            .saturating_add(close.len());
    }
    out
}

/// Remove `<...>` markup, leaving text content.
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_file_type_detection() {
        assert_eq!(FileType::from_name("report.pdf"), Some(FileType::Pdf));
        assert_eq!(FileType::from_name("Notes.MD"), Some(FileType::Markdown));
        assert_eq!(FileType::from_name("data.CSV"), Some(FileType::Csv));
        assert_eq!(FileType::from_name("archive.tar.gz"), None);
        assert_eq!(FileType::from_name("binary.exe"), None);
    }

    #[test]
    fn test_extract_txt() {
        let (text, structure) = extract_text(FileType::Txt, b"line one\nline two").expect("ok");
        assert_eq!(text, "line one\nline two");
        match structure {
            DocumentStructure::Text { lines, characters } => {
                assert_eq!(lines, 2);
                assert_eq!(characters, 17);
            }
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_extract_markdown_headers() {
        let md = b"# Title\n\nsome text\n\n## Section\n\nmore";
        let (_text, structure) = extract_text(FileType::Markdown, md).expect("ok");
        match structure {
            DocumentStructure::Markdown { headers, .. } => {
                assert_eq!(headers, vec!["# Title", "## Section"]);
            }
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_extract_json_pretty_and_keys() {
        let json = br#"{"alpha": 1, "beta": [1, 2]}"#;
        let (text, structure) = extract_text(FileType::Json, json).expect("ok");
        assert!(text.contains("\"alpha\": 1"));
        match structure {
            DocumentStructure::Json { keys, is_array, size } => {
                assert_eq!(keys, vec!["alpha", "beta"]);
                assert!(!is_array);
                assert_eq!(size, 2);
            }
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_extract_json_malformed() {
        let result = extract_text(FileType::Json, b"{not json");
        assert!(matches!(result, Err(ExtractError::Malformed("json", _))));
    }

    #[test]
    fn test_extract_html_strips_tags() {
        let html = b"<html><body><h1>Hello</h1>\n<p>World &amp; friends</p></body></html>";
        let (text, _structure) = extract_text(FileType::Html, html).expect("ok");
        assert_eq!(text, "Hello World & friends");
    }

    #[test]
    fn test_extract_csv() {
        let csv = b"name,age\nalice,30\nbob,25";
        let (text, structure) = extract_text(FileType::Csv, csv).expect("ok");
        assert!(text.starts_with("Columns: name, age"));
        match structure {
            DocumentStructure::Spreadsheet { columns, rows } => {
                assert_eq!(columns, vec!["name", "age"]);
                assert_eq!(rows, 2);
            }
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_empty_content_is_no_text() {
        let result = extract_text(FileType::Txt, b"   \n  ");
        assert!(matches!(result, Err(ExtractError::NoText)));
    }

    // ── ZIP fixtures built by hand ──

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("deflate write");
        encoder.finish().expect("deflate finish")
    }

    /// Build a minimal one-or-more-entry ZIP with deflate compression.
    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut offsets = Vec::new();

        for (name, data) in files {
            let compressed = deflate(data);
            offsets.push(out.len());
            // Local file header.
            out.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
            out.extend_from_slice(&20u16.to_le_bytes()); // version
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&8u16.to_le_bytes()); // method: deflate
            out.extend_from_slice(&0u32.to_le_bytes()); // time+date
            out.extend_from_slice(&0u32.to_le_bytes()); // crc (unchecked)
            out.extend_from_slice(&u32::try_from(compressed.len()).expect("size").to_le_bytes());
            out.extend_from_slice(&u32::try_from(data.len()).expect("size").to_le_bytes());
            out.extend_from_slice(&u16::try_from(name.len()).expect("len").to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&compressed);
        }

        let cd_offset = out.len();
        for ((name, data), offset) in files.iter().zip(&offsets) {
            let compressed_len = deflate(data).len();
            central.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
            central.extend_from_slice(&20u16.to_le_bytes()); // version made by
            central.extend_from_slice(&20u16.to_le_bytes()); // version needed
            central.extend_from_slice(&0u16.to_le_bytes()); // flags
            central.extend_from_slice(&8u16.to_le_bytes()); // method
            central.extend_from_slice(&0u32.to_le_bytes()); // time+date
            central.extend_from_slice(&0u32.to_le_bytes()); // crc
            central
                .extend_from_slice(&u32::try_from(compressed_len).expect("size").to_le_bytes());
            central.extend_from_slice(&u32::try_from(data.len()).expect("size").to_le_bytes());
            central.extend_from_slice(&u16::try_from(name.len()).expect("len").to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra
            central.extend_from_slice(&0u16.to_le_bytes()); // comment
            central.extend_from_slice(&0u16.to_le_bytes()); // disk
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&u32::try_from(*offset).expect("offset").to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }
        out.extend_from_slice(&central);

        // End of central directory.
        let count = u16::try_from(files.len()).expect("count");
        out.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
        out.extend_from_slice(&0u16.to_le_bytes()); // disk
        out.extend_from_slice(&0u16.to_le_bytes()); // cd disk
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&u32::try_from(central.len()).expect("size").to_le_bytes());
        out.extend_from_slice(&u32::try_from(cd_offset).expect("offset").to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len
        out
    }

    #[test]
    fn test_extract_docx() {
        let document = br#"<?xml version="1.0"?><w:document><w:body>
            <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let zip = build_zip(&[("word/document.xml", document.as_slice())]);

        let (text, structure) = extract_text(FileType::Docx, &zip).expect("ok");
        assert!(text.contains("First paragraph."));
        assert!(text.contains("Second paragraph."));
        match structure {
            DocumentStructure::Docx {
                total_paragraphs, ..
            } => assert_eq!(total_paragraphs, 2),
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_extract_pptx() {
        let slide1 = br#"<p:sld><a:t>Title slide</a:t></p:sld>"#;
        let slide2 = br#"<p:sld><a:t>Second slide</a:t><a:t>with bullets</a:t></p:sld>"#;
        let zip = build_zip(&[
            ("ppt/slides/slide1.xml", slide1.as_slice()),
            ("ppt/slides/slide2.xml", slide2.as_slice()),
        ]);

        let (text, structure) = extract_text(FileType::Pptx, &zip).expect("ok");
        assert!(text.contains("--- Slide 1 ---"));
        assert!(text.contains("Title slide"));
        assert!(text.contains("with bullets"));
        match structure {
            DocumentStructure::Pptx { total_slides, .. } => assert_eq!(total_slides, 2),
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_extract_xlsx_shared_strings() {
        let shared = br#"<sst><si><t>Revenue</t></si><si><t>12000</t></si></sst>"#;
        let zip = build_zip(&[("xl/sharedStrings.xml", shared.as_slice())]);

        let (text, _structure) = extract_text(FileType::Xlsx, &zip).expect("ok");
        assert!(text.contains("Revenue"));
        assert!(text.contains("12000"));
    }

    #[test]
    fn test_extract_docx_missing_document_part() {
        let zip = build_zip(&[("other.xml", b"<x/>".as_slice())]);
        let result = extract_text(FileType::Docx, &zip);
        assert!(matches!(result, Err(ExtractError::Malformed("docx", _))));
    }

    #[test]
    fn test_zip_garbage_rejected() {
        let result = extract_text(FileType::Docx, b"definitely not a zip file");
        assert!(matches!(result, Err(ExtractError::Malformed("zip", _))));
    }

    // ── PDF ──

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).expect("zlib write");
        encoder.finish().expect("zlib finish")
    }

    fn build_pdf(content: &str, pages: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.4\n");
        for _ in 0..pages {
            out.extend_from_slice(b"<< /Type /Page >>\n");
        }
        let compressed = zlib(content.as_bytes());
        out.extend_from_slice(b"<< /Filter /FlateDecode >>\nstream\n");
        out.extend_from_slice(&compressed);
        out.extend_from_slice(b"\nendstream\n%%EOF");
        out
    }

    #[test]
    fn test_extract_pdf_flate_stream() {
        let content = "BT /F1 12 Tf (Hello from page one) Tj ET";
        let pdf = build_pdf(content, 3);

        let (text, structure) = extract_text(FileType::Pdf, &pdf).expect("ok");
        assert!(text.contains("Hello from page one"));
        match structure {
            DocumentStructure::Pdf { total_pages, .. } => assert_eq!(total_pages, 3),
            other => panic!("wrong structure: {other:?}"),
        }
    }

    #[test]
    fn test_extract_pdf_tj_array() {
        let content = "BT [(Hel)(lo ) (world)] TJ ET";
        let pdf = build_pdf(content, 1);
        let (text, _structure) = extract_text(FileType::Pdf, &pdf).expect("ok");
        assert!(text.contains("Hel"));
        assert!(text.contains("world"));
    }

    #[test]
    fn test_extract_pdf_no_text() {
        let pdf = b"%PDF-1.4\n<< /Type /Page >>\n%%EOF";
        let result = extract_text(FileType::Pdf, pdf);
        assert!(matches!(result, Err(ExtractError::NoText)));
    }

    #[test]
    fn test_structure_total_pages() {
        let pdf = DocumentStructure::Pdf {
            total_pages: 3,
            page_lengths: vec![],
        };
        assert_eq!(pdf.total_pages(), Some(3));
        let txt = DocumentStructure::Text {
            lines: 1,
            characters: 10,
        };
        assert_eq!(txt.total_pages(), None);
    }
}
