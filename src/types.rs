//! Domain types passed between pipeline stages.

use crate::error::ConcallError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tempfile::NamedTempFile;

/// An uppercase exchange ticker, e.g. `BALKRISIND`.
///
/// Always non-empty and ASCII alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CompanyIdentifier(String);

impl CompanyIdentifier {
    /// Normalise user input into a ticker.
    ///
    /// Trims whitespace, drops a Yahoo-style `.NS` / `.BO` exchange suffix and
    /// uppercases before validating.
    pub fn parse(input: &str) -> Result<Self, ConcallError> {
        let trimmed = input.trim();
        let upper = trimmed.to_ascii_uppercase();
        let bare = upper
            .strip_suffix(".NS")
            .or_else(|| upper.strip_suffix(".BO"))
            .unwrap_or(&upper);

        if bare.is_empty() || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConcallError::InvalidIdentifier {
                input: input.to_string(),
            });
        }
        Ok(Self(bare.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CompanyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CompanyIdentifier {
    type Error = ConcallError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CompanyIdentifier> for String {
    fn from(id: CompanyIdentifier) -> Self {
        id.0
    }
}

/// The most recent presentation found on a company's listing page.
///
/// "Most recent" means first in page order; `label` is advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationLink {
    /// Absolute URL of the presentation.
    pub url: String,
    /// Quarter/date text next to the link, e.g. "Nov 2024".
    pub label: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

impl PresentationLink {
    pub fn new(url: impl Into<String>, label: Option<String>) -> Self {
        Self {
            url: url.into(),
            label,
            discovered_at: Utc::now(),
        }
    }

    /// The label when present, otherwise the URL.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.url)
    }
}

/// A downloaded presentation.
///
/// The bytes live in a temporary file that is deleted when the `Artifact`
/// is dropped, on success and failure alike.
#[derive(Debug)]
pub struct Artifact {
    spool: NamedTempFile,
    /// Validated, possibly sniffed MIME type.
    pub content_type: String,
    pub size_bytes: u64,
    pub source_link: PresentationLink,
}

impl Artifact {
    pub(crate) fn new(
        spool: NamedTempFile,
        content_type: String,
        size_bytes: u64,
        source_link: PresentationLink,
    ) -> Self {
        Self {
            spool,
            content_type,
            size_bytes,
            source_link,
        }
    }

    /// Location of the transient copy.
    pub fn path(&self) -> &Path {
        self.spool.path()
    }

    /// Read the whole artifact into memory.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, ConcallError> {
        tokio::fs::read(self.spool.path())
            .await
            .map_err(|e| ConcallError::Internal(format!("reading artifact spool: {e}")))
    }

    /// File name hint for upload APIs.
    pub fn display_name(&self) -> String {
        reqwest::Url::parse(&self.source_link.url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "presentation".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uppercases_and_strips_suffix() {
        assert_eq!(CompanyIdentifier::parse("balkrisind").unwrap().as_str(), "BALKRISIND");
        assert_eq!(CompanyIdentifier::parse(" TATASTEEL.NS ").unwrap().as_str(), "TATASTEEL");
        assert_eq!(CompanyIdentifier::parse("500325.bo").unwrap().as_str(), "500325");
    }

    #[test]
    fn parse_rejects_empty_and_symbols() {
        for bad in ["", "   ", ".NS", "M&M", "BAJAJ-AUTO", "TCS/../x"] {
            let err = CompanyIdentifier::parse(bad).unwrap_err();
            assert!(
                matches!(err, ConcallError::InvalidIdentifier { .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn identifier_serde_validates() {
        let ok: CompanyIdentifier = serde_json::from_str("\"infy\"").unwrap();
        assert_eq!(ok.as_str(), "INFY");
        assert!(serde_json::from_str::<CompanyIdentifier>("\"a b\"").is_err());
    }

    #[test]
    fn display_label_falls_back_to_url() {
        let link = PresentationLink::new("https://site/pres/q2fy24.pdf", None);
        assert_eq!(link.display_label(), "https://site/pres/q2fy24.pdf");
        let link = PresentationLink::new("https://site/pres/q2fy24.pdf", Some("Nov 2023".into()));
        assert_eq!(link.display_label(), "Nov 2023");
    }

    #[tokio::test]
    async fn artifact_spool_removed_on_drop() {
        use std::io::Write;

        let mut spool = NamedTempFile::new().unwrap();
        spool.write_all(b"%PDF-1.7").unwrap();
        let artifact = Artifact::new(
            spool,
            "application/pdf".into(),
            8,
            PresentationLink::new("https://site/pres/q2fy24.pdf", None),
        );
        let path = artifact.path().to_path_buf();
        assert_eq!(artifact.read_bytes().await.unwrap(), b"%PDF-1.7");
        assert_eq!(artifact.display_name(), "q2fy24.pdf");

        drop(artifact);
        assert!(!path.exists());
    }
}
