//! Turning fetched bytes into plain text.

use std::sync::LazyLock;

use pipeline::FetchError;
use regex::Regex;

static HIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->",
    )
    .expect("hidden-content regex")
});

static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<(?:br|/p|/div|/h[1-6]|/li|/tr|/title)\b[^>]*>").expect("line-break regex")
});

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));

static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\f]+").expect("spaces regex"));

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-lines regex"));

/// Reduces an HTML page to readable text.
///
/// Scripts, styles and comments are dropped, block ends become line breaks,
/// common entities are decoded and whitespace is collapsed.
pub fn strip_html(html: &str) -> String {
    let text = HIDDEN.replace_all(html, "");
    let text = LINE_BREAK.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = SPACES.replace_all(&text, " ");
    let text = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
    BLANK_LINES.replace_all(&text, "\n\n").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extracts text from a fetched body according to its content type.
///
/// PDFs are recognised by type or by their `%PDF` signature. Bodies without
/// a content type are read as UTF-8 text.
///
/// # Errors
///
/// - [`FetchError::Extraction`] if a PDF cannot be parsed.
/// - [`FetchError::UnsupportedContent`] for binary types other than PDF.
pub async fn document_text(
    url: &str,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<String, FetchError> {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if mime == "application/pdf" || bytes.starts_with(b"%PDF") {
        return pdf_text(bytes.to_vec()).await;
    }
    if mime == "text/html" || mime == "application/xhtml+xml" {
        return Ok(strip_html(&String::from_utf8_lossy(bytes)));
    }
    if mime.is_empty()
        || mime.starts_with("text/")
        || mime.ends_with("json")
        || mime.ends_with("xml")
    {
        return Ok(String::from_utf8_lossy(bytes).into_owned());
    }
    Err(FetchError::UnsupportedContent {
        url: url.to_string(),
        content_type: mime,
    })
}

async fn pdf_text(bytes: Vec<u8>) -> Result<String, FetchError> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|_| FetchError::Extraction("PDF text extraction panicked".to_string()))?
        .map_err(|e| FetchError::Extraction(format!("PDF text extraction failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_is_reduced_to_visible_text() {
        let html = "<html><head><style>p{color:red}</style><script>var a = '<p>';</script></head>\
            <body><h1>Title</h1><p>Hello&nbsp;<b>world</b> &amp; friends</p><!-- hidden -->\
            <p>Second   line</p></body></html>";
        assert_eq!(strip_html(html), "Title\nHello world & friends\nSecond line");
    }

    #[test]
    fn runs_of_blank_lines_collapse() {
        assert_eq!(strip_html("a<br><br><br><br>b"), "a\n\nb");
    }

    #[tokio::test]
    async fn text_types_pass_through() {
        let text = document_text("u", Some("text/plain; charset=utf-8"), b"plain body")
            .await
            .unwrap();
        assert_eq!(text, "plain body");
        let html = document_text("u", Some("TEXT/HTML"), b"<p>x</p>").await.unwrap();
        assert_eq!(html, "x");
    }

    #[tokio::test]
    async fn binary_types_are_unsupported() {
        let err = document_text("u", Some("image/png"), &[0x89, b'P', b'N', b'G'])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::UnsupportedContent { ref content_type, .. } if content_type == "image/png"
        ));
    }

    #[tokio::test]
    async fn broken_pdf_is_an_extraction_error() {
        let err = document_text("u", None, b"%PDF-1.7 not really a pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Extraction(_)));
    }
}
