use std::sync::Arc;

use async_trait::async_trait;
use pipeline::{
    ContentFetcher, OperatorContext, OperatorError, OperatorKey, PortMap, PortValue, ToolHandler,
};
use tracing::info;

use super::{output, required};

/// Rewrites arXiv abstract URLs to the matching PDF URL.
///
/// `https://arxiv.org/abs/2401.00001` becomes
/// `https://arxiv.org/pdf/2401.00001.pdf`; any other URL is returned trimmed.
pub fn normalize_arxiv_url(url: &str) -> String {
    let url = url.trim();
    if !url.contains("arxiv.org/abs/") {
        return url.to_string();
    }
    let mut pdf = url.replacen("/abs/", "/pdf/", 1);
    if !pdf.ends_with(".pdf") {
        pdf.push_str(".pdf");
    }
    pdf
}

/// `pdf_fetch`: downloads a paper and extracts its text.
pub struct PdfFetch {
    fetcher: Arc<dyn ContentFetcher>,
}

impl PdfFetch {
    /// Creates the handler.
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ToolHandler for PdfFetch {
    async fn handle(
        &self,
        operator: &OperatorKey,
        inputs: PortMap,
        _ctx: &mut OperatorContext,
    ) -> Result<PortMap, OperatorError> {
        let url = normalize_arxiv_url(required(operator, &inputs, "url", PortValue::as_text)?);
        let document = self.fetcher.fetch(&url).await?;
        if document.text.trim().is_empty() {
            return Err(OperatorError::InvalidData {
                operator: operator.clone(),
                message: format!("no text could be extracted from '{url}'"),
            });
        }

        info!(
            url = %document.url,
            chars = document.text.chars().count(),
            bytes = document.bytes.len(),
            "Fetched document"
        );
        Ok(PortMap::from([
            output("text", document.text),
            output("pdf_bytes", PortValue::PdfBytes(document.bytes)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arxiv_abstract_urls_point_at_the_pdf() {
        assert_eq!(
            normalize_arxiv_url(" https://arxiv.org/abs/2401.00001v2 "),
            "https://arxiv.org/pdf/2401.00001v2.pdf"
        );
        assert_eq!(
            normalize_arxiv_url("https://arxiv.org/pdf/2401.00001.pdf"),
            "https://arxiv.org/pdf/2401.00001.pdf"
        );
        assert_eq!(
            normalize_arxiv_url("https://example.org/abs/paper"),
            "https://example.org/abs/paper"
        );
    }
}
