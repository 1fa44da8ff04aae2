//! HTTP(S) and local-file [`ContentFetcher`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{ContentFetcher, FetchError, FetchedDocument};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::text::document_text;

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            user_agent: concat!("studyflow/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches `http(s)://` URLs over the network and `file://` URLs or bare
/// paths from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds the fetcher.
    ///
    /// # Errors
    ///
    /// [`FetchError::Transport`] if the HTTP client cannot be initialised.
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> Result<(Option<String>, Vec<u8>), FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(transport)?;
        Ok((content_type, bytes.to_vec()))
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let (content_type, bytes) = match local_path(url) {
            Some(path) => {
                debug!(path = %path.display(), "Reading local source");
                let bytes = tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                (content_type_for(&path).map(str::to_string), bytes)
            }
            None => self.download(url).await?,
        };

        let text = document_text(url, content_type.as_deref(), &bytes).await?;
        info!(
            url,
            content_type = content_type.as_deref().unwrap_or("unknown"),
            bytes = bytes.len(),
            chars = text.chars().count(),
            "Fetched content"
        );
        Ok(FetchedDocument {
            url: url.to_string(),
            content_type,
            bytes,
            text,
        })
    }
}

/// Local path for `file://` URLs and scheme-less strings.
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    (!url.contains("://")).then(|| PathBuf::from(url))
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => Some("application/pdf"),
        "html" | "htm" => Some("text/html"),
        "txt" | "md" => Some("text/plain"),
        "json" => Some("application/json"),
        _ => None,
    }
}
