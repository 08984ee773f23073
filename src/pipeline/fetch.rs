//! Artifact download: stream a presentation into a temporary file.
//!
//! The body is streamed chunk by chunk into a [`NamedTempFile`] owned by the
//! returned [`Artifact`], so the file disappears when the artifact is
//! dropped, whichever stage finishes with it. A failed or rejected download
//! drops the partial spool before returning, leaving nothing behind.
//!
//! Checks happen as early as the response allows:
//!
//! 1. status (4xx terminal, 5xx/429 retried)
//! 2. declared `Content-Type` against the document allow-list
//! 3. declared `Content-Length` against the size ceiling
//! 4. streamed byte count against the ceiling (servers lie or omit the header)
//! 5. magic bytes: a body declared PDF must start with `%PDF`, and a body
//!    that starts like text or markup is never accepted as a document

use crate::error::{ConcallError, FetchFailure};
use crate::pipeline::retry::{retry_with_backoff, RetryPolicy};
use crate::types::{Artifact, PresentationLink};
use futures::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_PPT: &str = "application/vnd.ms-powerpoint";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Declared content types accepted from the artifact host.
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    MIME_PDF,
    MIME_PPT,
    MIME_PPTX,
    MIME_OCTET_STREAM,
    // Some hosts mislabel PDFs with these.
    "application/x-pdf",
    "binary/octet-stream",
];

/// Downloads presentations behind resolved links.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: Client,
    timeout_secs: u64,
    max_bytes: u64,
    retry: RetryPolicy,
    spool_dir: Option<PathBuf>,
}

impl ArtifactFetcher {
    pub fn new(client: Client, timeout_secs: u64, max_bytes: u64, retry: RetryPolicy) -> Self {
        Self {
            client,
            timeout_secs,
            max_bytes,
            retry,
            spool_dir: None,
        }
    }

    /// Spool downloads into `dir` instead of the system temp dir.
    pub fn with_spool_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spool_dir = dir;
        self
    }

    fn create_spool(&self) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("concall-");
        match &self.spool_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    /// Download the artifact behind `link`.
    ///
    /// # Errors
    /// - [`ConcallError::Download`] — network failure, timeout, non-2xx, or
    ///   a body larger than the ceiling. Only transient variants are retried.
    /// - [`ConcallError::UnsupportedFormat`] — not a PDF/PPT/PPTX (or an
    ///   octet-stream fallback).
    pub async fn fetch(&self, link: &PresentationLink) -> Result<Artifact, ConcallError> {
        retry_with_backoff(&self.retry, "artifact download", || self.fetch_once(link)).await
    }

    async fn fetch_once(&self, link: &PresentationLink) -> Result<Artifact, ConcallError> {
        let url = link.url.as_str();
        let download_failed = |failure: FetchFailure| ConcallError::Download {
            url: url.to_string(),
            failure,
        };

        info!("Downloading presentation from: {}", url);
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .header(
                reqwest::header::ACCEPT,
                "application/pdf,application/vnd.ms-powerpoint,application/vnd.openxmlformats-officedocument.presentationml.presentation,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| download_failed(FetchFailure::from_reqwest(&e, self.timeout_secs)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_failed(FetchFailure::Status(status.as_u16())));
        }

        let declared = declared_content_type(&response);
        if !is_allowed_content_type(&declared) {
            return Err(ConcallError::UnsupportedFormat {
                url: url.to_string(),
                content_type: declared,
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(download_failed(FetchFailure::TooLarge {
                    limit_bytes: self.max_bytes,
                    observed_bytes: len,
                }));
            }
        }

        let spool = self
            .create_spool()
            .map_err(|e| ConcallError::Internal(format!("creating artifact spool: {e}")))?;
        let std_file = spool
            .reopen()
            .map_err(|e| ConcallError::Internal(format!("opening artifact spool: {e}")))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut written: u64 = 0;
        let mut head: Vec<u8> = Vec::with_capacity(8);
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| download_failed(FetchFailure::from_reqwest(&e, self.timeout_secs)))?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                // `spool` is dropped here, deleting the partial file.
                return Err(download_failed(FetchFailure::TooLarge {
                    limit_bytes: self.max_bytes,
                    observed_bytes: written,
                }));
            }
            if head.len() < 8 {
                let take = (8 - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| ConcallError::Internal(format!("writing artifact spool: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| ConcallError::Internal(format!("flushing artifact spool: {e}")))?;

        if written == 0 {
            return Err(download_failed(FetchFailure::Network("empty body".into())));
        }

        let content_type = effective_content_type(&declared, &head, url).ok_or_else(|| {
            ConcallError::UnsupportedFormat {
                url: url.to_string(),
                content_type: declared.clone(),
            }
        })?;

        debug!(
            "Downloaded {} bytes ({} declared as {}) to {}",
            written,
            content_type,
            declared,
            spool.path().display()
        );

        Ok(Artifact::new(spool, content_type, written, link.clone()))
    }
}

/// Lower-cased MIME type without parameters; octet-stream when absent.
fn declared_content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| MIME_OCTET_STREAM.to_string())
}

pub fn is_allowed_content_type(mime: &str) -> bool {
    ALLOWED_CONTENT_TYPES.contains(&mime)
}

/// Sniff the document type from leading bytes.
pub fn sniff_mime(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(b"%PDF") {
        Some(MIME_PDF)
    } else if head.starts_with(b"PK\x03\x04") {
        Some(MIME_PPTX)
    } else if head.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
        Some(MIME_PPT)
    } else {
        None
    }
}

/// Whether the leading bytes look like an HTML/XML page, JSON or plain
/// text rather than a binary document.
pub fn looks_like_text(head: &[u8]) -> bool {
    let head = head.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(head);
    let trimmed: &[u8] = match head.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(start) => &head[start..],
        None => return true,
    };
    matches!(trimmed[0], b'<' | b'{' | b'[')
        || trimmed
            .iter()
            .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
}

/// The MIME type to hand to the analysis service, or `None` when the body
/// contradicts the declared type.
///
/// A declared PDF must carry the `%PDF` signature. Generic types are
/// resolved by sniffing and then, for binary bodies only, by URL extension.
pub fn effective_content_type(declared: &str, head: &[u8], url: &str) -> Option<String> {
    let sniffed = sniff_mime(head);
    if sniffed.is_none() && looks_like_text(head) {
        return None;
    }
    match declared {
        MIME_PDF | "application/x-pdf" => (sniffed == Some(MIME_PDF)).then(|| MIME_PDF.to_string()),
        MIME_PPT | MIME_PPTX => Some(sniffed.unwrap_or(declared).to_string()),
        _ => Some(
            sniffed
                .or_else(|| mime_from_extension(url))
                .unwrap_or(MIME_OCTET_STREAM)
                .to_string(),
        ),
    }
}

fn mime_from_extension(url: &str) -> Option<&'static str> {
    let path = reqwest::Url::parse(url).ok()?.path().to_ascii_lowercase();
    if path.ends_with(".pdf") {
        Some(MIME_PDF)
    } else if path.ends_with(".pptx") {
        Some(MIME_PPTX)
    } else if path.ends_with(".ppt") {
        Some(MIME_PPT)
    } else {
        None
    }
}
