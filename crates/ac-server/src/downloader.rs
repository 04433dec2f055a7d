//! Source audio fetching.
//!
//! [`Downloader`] streams a remote resource to a local file chunk by chunk,
//! so large sources never sit in memory. Any non-success upstream status is
//! a download failure.

use std::path::Path;

use reqwest::Url;
use tokio::io::AsyncWriteExt;

use ac_core::config::ConversionConfig;
use ac_core::{Error, Result};

/// HTTP client wrapper for fetching source audio.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    max_bytes: Option<u64>,
}

impl Downloader {
    pub fn new(config: &ConversionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .user_agent(concat!("audioconv/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_bytes: config.max_download_bytes,
        })
    }

    /// Download `url` into `dest`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// [`Error::Download`] on transport failure, a non-2xx status, or a body
    /// larger than the configured limit. [`Error::Io`] if writing fails.
    pub async fn fetch_to_file(&self, url: &Url, dest: &Path) -> Result<u64> {
        tracing::debug!(%url, dest = %dest.display(), "Downloading source audio");

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::download(url.as_str(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::download(
                url.as_str(),
                format!("upstream returned {status}"),
            ));
        }

        if let (Some(max), Some(len)) = (self.max_bytes, response.content_length()) {
            if len > max {
                return Err(Error::download(
                    url.as_str(),
                    format!("source is {len} bytes, limit is {max}"),
                ));
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::download(url.as_str(), e.to_string()))?
        {
            written += chunk.len() as u64;
            if let Some(max) = self.max_bytes {
                if written > max {
                    return Err(Error::download(
                        url.as_str(),
                        format!("source exceeds limit of {max} bytes"),
                    ));
                }
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Parse and check a submitted source URL. Only absolute http(s) URLs with
/// a host are accepted.
pub fn parse_source_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Validation("url must not be empty".into()));
    }

    let url = Url::parse(raw).map_err(|e| Error::Validation(format!("invalid url '{raw}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "unsupported url scheme '{}', expected http or https",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::Validation(format!("url '{raw}' has no host")));
    }

    Ok(url)
}

/// Local name for the downloaded source. The URL's extension is kept when it
/// looks like one so ffmpeg's format probing gets a hint.
pub fn input_file_name(url: &Url) -> String {
    let ext = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.bytes().all(|b| b.is_ascii_alphanumeric()));

    match ext {
        Some(ext) => format!("source.{}", ext.to_ascii_lowercase()),
        None => "source".to_string(),
    }
}
