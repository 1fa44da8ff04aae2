//! Content fetching and figure extraction ports.

use async_trait::async_trait;

use crate::FetchError;

/// A downloaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedDocument {
    /// URL actually fetched (after normalisation).
    pub url: String,
    /// Reported content type, if any.
    pub content_type: Option<String>,
    /// Raw body.
    pub bytes: Vec<u8>,
    /// Extracted plain text.
    pub text: String,
}

/// Downloads a source and extracts its text.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetches `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

/// An image extracted from a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    /// Zero-based figure index within the document.
    pub index: usize,
    /// One-based page number, when known.
    pub page: Option<u32>,
    /// Encoded image.
    pub bytes: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// File extension of the encoding (`png`, `jpeg`).
    pub format: String,
    /// Source file name or caption, when known.
    pub caption: Option<String>,
}

impl Figure {
    /// File name used when saving the figure.
    ///
    /// Captions are reduced to their file stem; path separators never survive.
    pub fn file_name(&self) -> String {
        let stem = self
            .caption
            .as_deref()
            .and_then(|caption| std::path::Path::new(caption).file_stem())
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty());
        match stem {
            Some(stem) => format!("{stem}.{}", self.format),
            None => format!("fig_{}.{}", self.index, self.format),
        }
    }
}

/// Prompt-ready description of extracted figures.
pub fn describe_figures(figures: &[Figure]) -> String {
    if figures.is_empty() {
        return "No figures extracted from PDF.".to_string();
    }
    figures
        .iter()
        .map(|fig| {
            let mut line = format!("- Figure {}: Size {}x{}px", fig.index, fig.width, fig.height);
            if let Some(caption) = &fig.caption {
                line.push_str(&format!(" (Filename: {caption})"));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pulls figures out of a document.
#[async_trait]
pub trait FigureExtractor: Send + Sync {
    /// Extracts figures from `pdf`; `source_url` lets implementations prefer a
    /// higher-quality source (e.g. arXiv sources).
    async fn extract(&self, pdf: &[u8], source_url: Option<&str>)
        -> Result<Vec<Figure>, FetchError>;
}
