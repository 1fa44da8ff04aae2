//! Figure extraction from embedded PDF images.

use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object};
use pipeline::{FetchError, Figure, FigureExtractor};
use tracing::{debug, info};

/// Pulls JPEG image streams out of a PDF.
///
/// Images smaller than the configured bounds (icons, logos) are skipped.
/// Only streams stored with a single `DCTDecode` filter are returned, since
/// their content is a complete JPEG file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfFigureExtractor {
    min_width: u32,
    min_height: u32,
}

impl Default for PdfFigureExtractor {
    fn default() -> Self {
        Self::new(100, 100)
    }
}

impl PdfFigureExtractor {
    /// Creates an extractor ignoring images below `min_width` x `min_height`.
    pub fn new(min_width: u32, min_height: u32) -> Self {
        Self {
            min_width,
            min_height,
        }
    }

    /// Synchronous extraction.
    ///
    /// # Errors
    ///
    /// [`FetchError::Extraction`] if `pdf` cannot be parsed.
    pub fn extract_from(&self, pdf: &[u8]) -> Result<Vec<Figure>, FetchError> {
        let document = Document::load_mem(pdf)
            .map_err(|e| FetchError::Extraction(format!("cannot parse PDF: {e}")))?;

        let mut figures = Vec::new();
        for object in document.objects.values() {
            let Object::Stream(stream) = object else {
                continue;
            };
            let dict = &stream.dict;
            if !has_name(dict, b"Subtype", b"Image") || !is_plain_jpeg(dict) {
                continue;
            }
            let (Some(width), Some(height)) = (dimension(dict, b"Width"), dimension(dict, b"Height"))
            else {
                continue;
            };
            if width < self.min_width || height < self.min_height {
                debug!(width, height, "Skipping small image");
                continue;
            }
            figures.push(Figure {
                index: figures.len(),
                page: None,
                bytes: stream.content.clone(),
                width,
                height,
                format: "jpeg".to_string(),
                caption: None,
            });
        }
        Ok(figures)
    }
}

#[async_trait]
impl FigureExtractor for PdfFigureExtractor {
    async fn extract(
        &self,
        pdf: &[u8],
        source_url: Option<&str>,
    ) -> Result<Vec<Figure>, FetchError> {
        let extractor = *self;
        let pdf = pdf.to_vec();
        let figures = tokio::task::spawn_blocking(move || extractor.extract_from(&pdf))
            .await
            .map_err(|_| FetchError::Extraction("figure extraction panicked".to_string()))??;
        info!(
            source = source_url.unwrap_or("pdf"),
            figures = figures.len(),
            "Extracted figures"
        );
        Ok(figures)
    }
}

fn has_name(dict: &Dictionary, key: &[u8], expected: &[u8]) -> bool {
    dict.get(key)
        .and_then(Object::as_name)
        .is_ok_and(|name| name == expected)
}

fn is_plain_jpeg(dict: &Dictionary) -> bool {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name.as_slice() == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            matches!(filters.as_slice(), [Object::Name(name)] if name.as_slice() == b"DCTDecode")
        }
        _ => false,
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|value| u32::try_from(value).ok())
}
