//! Plain-text extraction for corpus files.
//!
//! Markdown and text files are read as UTF-8 (lossy). PDFs go through
//! `pdf-extract`. HTML is reduced to its visible text: `script`/`style`
//! blocks and tags are removed and common entities are decoded.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Markdown,
    Text,
    Pdf,
    Html,
}

impl DocumentFormat {
    /// Format from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(DocumentFormat::Markdown),
            "txt" => Some(DocumentFormat::Text),
            "pdf" => Some(DocumentFormat::Pdf),
            "html" | "htm" => Some(DocumentFormat::Html),
            _ => None,
        }
    }
}

/// Extraction error; the ingest loop skips the file.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::Markdown | DocumentFormat::Text => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Html => Ok(html_to_text(&String::from_utf8_lossy(bytes))),
    }
}

/// Extract text from a file on disk, picking the format by extension.
pub fn extract_file(path: &Path) -> anyhow::Result<String> {
    let format = DocumentFormat::from_path(path)
        .ok_or_else(|| ExtractError::Unsupported(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    Ok(extract_text(&bytes, format)?)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

static RE_SCRIPT_STYLE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->").ok());
static RE_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").ok());
static RE_NUMERIC_ENTITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]{1,6})|([0-9]{1,7}));").ok());

/// Visible text of an HTML document, whitespace-collapsed.
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for re in [&RE_SCRIPT_STYLE, &RE_TAG].into_iter().filter_map(|r| r.as_ref()) {
        text = re.replace_all(&text, " ").into_owned();
    }

    if let Some(re) = RE_NUMERIC_ENTITY.as_ref() {
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                let code = match (caps.get(1), caps.get(2)) {
                    (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                    (None, Some(dec)) => dec.as_str().parse::<u32>().ok(),
                    _ => None,
                };
                code.and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            })
            .into_owned();
    }

    // &amp; last so "&amp;lt;" decodes to the literal "&lt;"
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/b/Guide.PDF")),
            Some(DocumentFormat::Pdf)
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("index.htm")),
            Some(DocumentFormat::Html)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("notes.md")), Some(DocumentFormat::Markdown));
        assert_eq!(DocumentFormat::from_path(Path::new("image.png")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_html_to_text_strips_markup() {
        let html = r#"<html><head><title>VPN</title><style>p { color: red; }</style>
            <script type="text/javascript">var x = "<b>";</script></head>
            <body><!-- hidden --><h1>VPN&nbsp;setup</h1><p>Use the <b>tray</b> icon &amp; sign in.</p></body></html>"#;
        assert_eq!(html_to_text(html), "VPN VPN setup Use the tray icon & sign in.");
    }

    #[test]
    fn test_html_entities() {
        assert_eq!(html_to_text("&lt;tag&gt; &quot;q&quot; &#39;s&#39; &#x41;"), "<tag> \"q\" 's' A");
        assert_eq!(html_to_text("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_text_is_lossy_utf8() {
        let text = extract_text(b"caf\xc3\xa9 \xff", DocumentFormat::Text).unwrap();
        assert!(text.starts_with("café "));
    }

    #[test]
    fn test_invalid_pdf_is_error() {
        assert!(extract_text(b"not a pdf", DocumentFormat::Pdf).is_err());
    }
}
