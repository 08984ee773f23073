//! Gemini document analysis over the REST API.
//!
//! Presentations can exceed the inline-request limit, so the artifact goes
//! through the Files API:
//!
//! ```text
//! POST /upload/v1beta/files            raw bytes        → file {name, uri, state}
//! GET  /v1beta/{name}                  until ACTIVE
//! POST /v1beta/models/{model}:generateContent  fileData + prompt → text
//! DELETE /v1beta/{name}                best effort
//! ```
//!
//! The key travels in the `x-goog-api-key` header so it never shows up in
//! logged URLs.

use crate::config::PipelineConfig;
use crate::error::ConcallError;
use crate::pipeline::analyze::AnalysisService;
use crate::prompts::SYSTEM_PROMPT;
use crate::types::Artifact;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";
const PROVIDER: &str = "gemini";

/// Upper bound on state polls; the outer analysis timeout usually fires first.
const MAX_STATE_POLLS: u32 = 120;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    name: String,
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: RemoteFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Gemini `generateContent` with Files API upload.
pub struct GeminiService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: usize,
    poll_interval: Duration,
}

impl GeminiService {
    pub fn new(client: Client, api_key: String, config: &PipelineConfig) -> Self {
        Self {
            client,
            base_url: config.analysis_base_url.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            poll_interval: Duration::from_millis(config.upload_poll_interval_ms),
        }
    }

    async fn upload(&self, artifact: &Artifact) -> Result<RemoteFile, ConcallError> {
        let bytes = artifact.read_bytes().await?;
        let url = format!("{}/upload/v1beta/files", self.base_url);
        debug!("Uploading {} bytes ({}) to Gemini", bytes.len(), artifact.content_type);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-Upload-File-Name", artifact.display_name())
            .header(reqwest::header::CONTENT_TYPE, artifact.content_type.as_str())
            .body(bytes)
            .send()
            .await
            .map_err(network_failure)?;

        let upload: UploadResponse = parse_json(response).await?;
        Ok(upload.file)
    }

    async fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, ConcallError> {
        for _ in 0..MAX_STATE_POLLS {
            match file.state.as_deref() {
                None | Some("ACTIVE") => return Ok(file),
                Some("FAILED") => {
                    return Err(ConcallError::AnalysisService {
                        provider: PROVIDER.into(),
                        detail: format!("uploaded file {} failed processing", file.name),
                        transient: false,
                    })
                }
                Some(_) => {
                    tokio::time::sleep(self.poll_interval).await;
                    let url = format!("{}/v1beta/{}", self.base_url, file.name);
                    let response = self
                        .client
                        .get(&url)
                        .header(API_KEY_HEADER, &self.api_key)
                        .send()
                        .await
                        .map_err(network_failure)?;
                    file = parse_json(response).await?;
                }
            }
        }
        Err(ConcallError::AnalysisService {
            provider: PROVIDER.into(),
            detail: format!("uploaded file {} never became ACTIVE", file.name),
            transient: true,
        })
    }

    async fn generate(&self, file: &RemoteFile, mime_type: &str, prompt: &str) -> Result<String, ConcallError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "contents": [{
                "role": "user",
                "parts": [
                    { "fileData": { "mimeType": file.mime_type.as_deref().unwrap_or(mime_type), "fileUri": file.uri } },
                    { "text": prompt }
                ]
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens
            }
        });

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(network_failure)?;

        let parsed: GenerateResponse = parse_json(response).await?;
        extract_text(parsed)
    }

    async fn delete(&self, file: &RemoteFile) {
        let url = format!("{}/v1beta/{}", self.base_url, file.name);
        match self
            .client
            .delete(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => debug!("Deleted remote file {}", file.name),
            Ok(r) => debug!("Remote file {} not deleted: HTTP {}", file.name, r.status()),
            Err(e) => debug!("Remote file {} not deleted: {}", file.name, e),
        }
    }
}

#[async_trait]
impl AnalysisService for GeminiService {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn analyze_document(&self, artifact: &Artifact, prompt: &str) -> Result<String, ConcallError> {
        let uploaded = self.upload(artifact).await?;
        let file = match self.wait_until_active(uploaded.clone()).await {
            Ok(file) => file,
            Err(e) => {
                self.delete(&uploaded).await;
                return Err(e);
            }
        };
        let result = self.generate(&file, &artifact.content_type, prompt).await;
        self.delete(&file).await;
        result
    }
}

fn network_failure(e: reqwest::Error) -> ConcallError {
    ConcallError::AnalysisService {
        provider: PROVIDER.into(),
        detail: e.to_string(),
        transient: true,
    }
}

/// Map a non-2xx Gemini response to a typed failure.
fn status_failure(status: StatusCode, body: &str) -> ConcallError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED");
    let transient = rate_limited || status.is_server_error();
    let kind = if rate_limited {
        "rate limited"
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        "authentication failed"
    } else {
        "request failed"
    };
    let snippet: String = body.chars().take(300).collect();
    ConcallError::AnalysisService {
        provider: PROVIDER.into(),
        detail: format!("{kind} (HTTP {}): {}", status.as_u16(), snippet.trim()),
        transient,
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ConcallError> {
    let status = response.status();
    let body = response.text().await.map_err(network_failure)?;
    if !status.is_success() {
        let err = status_failure(status, &body);
        warn!("{}", err);
        return Err(err);
    }
    serde_json::from_str(&body).map_err(|e| ConcallError::AnalysisService {
        provider: PROVIDER.into(),
        detail: format!("unexpected response shape: {e}"),
        transient: false,
    })
}

fn extract_text(response: GenerateResponse) -> Result<String, ConcallError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ConcallError::AnalysisService {
            provider: PROVIDER.into(),
            detail: format!("prompt blocked: {reason}"),
            transient: false,
        });
    }

    let candidate = response.candidates.into_iter().next().ok_or_else(|| {
        ConcallError::AnalysisService {
            provider: PROVIDER.into(),
            detail: "response has no candidates".into(),
            transient: false,
        }
    })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ConcallError::AnalysisService {
            provider: PROVIDER.into(),
            detail: format!(
                "empty response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
            transient: false,
        });
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let e = status_failure(StatusCode::TOO_MANY_REQUESTS, "{}");
        assert!(e.is_transient());
        assert!(e.to_string().contains("rate limited"));

        let e = status_failure(StatusCode::BAD_REQUEST, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#);
        assert!(e.is_transient());

        let e = status_failure(StatusCode::FORBIDDEN, "API key not valid");
        assert!(!e.is_transient());
        assert!(e.to_string().contains("authentication failed"));

        assert!(status_failure(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!status_failure(StatusCode::BAD_REQUEST, "bad").is_transient());
    }

    #[test]
    fn text_parts_concatenated() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"1. Future"},{"text":" Guidance"}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(parsed).unwrap(), "1. Future Guidance");
    }

    #[test]
    fn blocked_prompt_is_service_error() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let err = extract_text(parsed).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
        assert!(!err.is_transient());
    }

    #[test]
    fn empty_candidate_is_service_error() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#).unwrap();
        let err = extract_text(parsed).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"));
    }
}
