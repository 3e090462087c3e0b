//! Text extraction for uploaded documents (plain text, PDF, HTML).
//!
//! The file type is chosen from the document name's extension; names
//! without an extension are sniffed from their leading bytes. Anything else
//! is rejected before chunking begins.

use scraper::ElementRef;
use std::path::Path;

use crate::error::{RagError, RagResult};

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_HTML: &str = "text/html";

/// Elements whose text content never reaches the index.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements that end a line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    "blockquote", "pre", "title",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    PlainText,
    Pdf,
    Html,
}

impl FileType {
    pub fn mime(&self) -> &'static str {
        match self {
            FileType::PlainText => MIME_TEXT,
            FileType::Pdf => MIME_PDF,
            FileType::Html => MIME_HTML,
        }
    }
}

/// Choose the extractor for `name`, falling back to content sniffing when
/// the name carries no extension.
pub fn detect_file_type(name: &str, bytes: &[u8]) -> RagResult<FileType> {
    if let Some(ext) = Path::new(name).extension() {
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        return match ext.as_str() {
            "txt" | "text" => Ok(FileType::PlainText),
            "pdf" => Ok(FileType::Pdf),
            "html" | "htm" => Ok(FileType::Html),
            _ => Err(RagError::UnsupportedFileType(ext)),
        };
    }

    if bytes.starts_with(b"%PDF-") {
        return Ok(FileType::Pdf);
    }

    let head_len = bytes.len().min(512);
    let head = String::from_utf8_lossy(&bytes[..head_len]).to_ascii_lowercase();
    let head = head.trim_start();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Ok(FileType::Html);
    }

    if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
        return Ok(FileType::PlainText);
    }

    Err(RagError::UnsupportedFileType(
        "unrecognised binary content".to_string(),
    ))
}

/// Extract plain UTF-8 text from `bytes` of the given type.
pub fn extract_text(bytes: &[u8], file_type: FileType) -> RagResult<String> {
    match file_type {
        FileType::PlainText => decode_utf8(bytes),
        FileType::Pdf => extract_pdf(bytes),
        FileType::Html => extract_html(bytes),
    }
}

fn decode_utf8(bytes: &[u8]) -> RagResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RagError::InvalidInput(format!("text is not valid UTF-8: {}", e)))
}

fn extract_pdf(bytes: &[u8]) -> RagResult<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::InvalidInput(format!("PDF extraction failed: {}", e)))
}

/// Strip markup from an HTML document. Parsing follows the HTML5 rules, so
/// stray `<` characters and named entities such as `&nbsp;` come through as
/// text. Whitespace is collapsed and block elements end a line.
fn extract_html(bytes: &[u8]) -> RagResult<String> {
    let source = decode_utf8(bytes)?;
    let document = scraper::Html::parse_document(&source);

    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    let lines: Vec<String> = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();
    Ok(lines.join("\n"))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    let block = BLOCK_ELEMENTS.contains(&name);
    if block {
        out.push('\n');
    }

    for child in element.children() {
        if let Some(child) = ElementRef::wrap(child) {
            collect_text(child, out);
        } else if let Some(text) = child.value().as_text() {
            // Source line breaks are layout, not content
            out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
        }
    }

    if block {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_selects_type() {
        assert_eq!(detect_file_type("a.txt", b"x").unwrap(), FileType::PlainText);
        assert_eq!(detect_file_type("a.PDF", b"x").unwrap(), FileType::Pdf);
        assert_eq!(detect_file_type("page.htm", b"x").unwrap(), FileType::Html);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = detect_file_type("setup.exe", b"MZ\x90\x00").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFileType(ref ext) if ext == "exe"));
    }

    #[test]
    fn sniffing_without_extension() {
        assert_eq!(detect_file_type("upload", b"%PDF-1.4\n").unwrap(), FileType::Pdf);
        assert_eq!(
            detect_file_type("upload", b"  <!DOCTYPE html><html></html>").unwrap(),
            FileType::Html
        );
        assert_eq!(detect_file_type("upload", b"just words").unwrap(), FileType::PlainText);
        assert!(detect_file_type("upload", &[0u8, 159, 146, 150]).is_err());
    }

    #[test]
    fn invalid_utf8_text_returns_invalid_input() {
        let err = extract_text(&[0xc3, 0x28], FileType::PlainText).unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[test]
    fn invalid_pdf_returns_invalid_input() {
        let err = extract_text(b"not a pdf", FileType::Pdf).unwrap_err();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[test]
    fn html_text_is_extracted_without_scripts() {
        let html = br#"<!DOCTYPE html>
<html><head><title>Guide</title><style>p { color: red; }</style></head>
<body><p>First line.<br>Second line.</p><script>var x = 1;</script><p>Third &amp; last.</p></body></html>"#;
        let text = extract_text(html, FileType::Html).unwrap();
        assert!(text.contains("Guide"));
        assert!(text.contains("First line."));
        assert!(text.contains("Second line."));
        assert!(text.contains("Third & last."));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn html_stray_angle_bracket_keeps_text() {
        let html = b"<p>If a < b then stop.</p><p>Important later text.</p>";
        let text = extract_text(html, FileType::Html).unwrap();
        assert_eq!(text, "If a < b then stop.\nImportant later text.");
    }

    #[test]
    fn html_named_entities_are_decoded() {
        let html = b"<p>Tom&nbsp;and&nbsp;Jerry.</p><p>Caf&eacute; &lt;open&gt;</p>";
        let text = extract_text(html, FileType::Html).unwrap();
        assert_eq!(text, "Tom and Jerry.\nCaf\u{e9} <open>");
        assert!(!text.contains("&nbsp;"));
    }

    #[test]
    fn html_inline_elements_do_not_split_words() {
        let html = b"<p>Hello <b>bold</b> world.\n  Next <i>line</i>.</p>";
        let text = extract_text(html, FileType::Html).unwrap();
        assert_eq!(text, "Hello bold world. Next line.");
    }
}
