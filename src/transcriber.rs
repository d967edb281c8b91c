//! Call recording transcription
//!
//! Downloads a recording from the telephony platform and transcribes it via an
//! OpenAI-compatible transcription API. The high-fidelity encoding is tried
//! first, the compressed one second.

use crate::config::TranscriptionSettings;
use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("Missing transcription configuration: {0}")]
    ConfigMissing(&'static str),
    #[error("Upstream rejected the credentials")]
    Unauthorized,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Transient upstream failure: {0}")]
    Transient(String),
    #[error("API error: {0}")]
    Api(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Encodings the telephony platform can serve a recording in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    Wav,
    Mp3,
}

impl RecordingFormat {
    /// Order in which encodings are attempted
    pub const ATTEMPT_ORDER: [RecordingFormat; 2] = [RecordingFormat::Wav, RecordingFormat::Mp3];

    pub fn extension(&self) -> &'static str {
        match self {
            RecordingFormat::Wav => "wav",
            RecordingFormat::Mp3 => "mp3",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            RecordingFormat::Wav => "audio/wav",
            RecordingFormat::Mp3 => "audio/mpeg",
        }
    }
}

/// Turns a recorded answer into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, recording_url: &str, language: &str) -> Result<String, TranscriptionError>;
}

/// Whether a transcript holds at least one word
pub fn is_usable(text: &str) -> bool {
    text.split_whitespace()
        .any(|word| word.chars().any(char::is_alphanumeric))
}

/// Primary language subtag of a BCP-47 tag ("nl-NL" -> "nl")
pub fn language_code(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .to_lowercase()
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper transcription client
pub struct WhisperTranscriber {
    client: Client,
    settings: TranscriptionSettings,
}

impl WhisperTranscriber {
    pub fn new(settings: TranscriptionSettings) -> Result<Self, TranscriptionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self { client, settings })
    }

    /// Fetch the recording bytes from the telephony platform
    async fn download(&self, url: &str) -> Result<Vec<u8>, TranscriptionError> {
        let mut request = self.client.get(url);
        if let (Some(sid), Some(token)) = (&self.settings.account_sid, &self.settings.auth_token) {
            request = request.basic_auth(sid, Some(token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, format!("download {}: {}", url, body)));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(TranscriptionError::Api(format!("empty recording at {}", url)));
        }
        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }

    async fn transcribe_format(
        &self,
        recording_url: &str,
        format: RecordingFormat,
        api_key: &str,
        language: &str,
    ) -> Result<String, TranscriptionError> {
        let url = format!("{}.{}", recording_url.trim_end_matches('/'), format.extension());
        let audio = self.download(&url).await?;

        let part = multipart::Part::bytes(audio)
            .file_name(format!("recording.{}", format.extension()))
            .mime_str(format.mime_type())?;

        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.settings.model.clone())
            .text("language", language_code(language))
            .text("response_format", "json");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.settings.api_base))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, body));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text.trim().to_string())
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, recording_url: &str, language: &str) -> Result<String, TranscriptionError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(TranscriptionError::ConfigMissing("API key"))?;

        let mut last_error = None;
        for format in RecordingFormat::ATTEMPT_ORDER {
            match self.transcribe_format(recording_url, format, api_key, language).await {
                Ok(text) => {
                    info!("Transcribed {} recording ({} chars)", format.extension(), text.len());
                    return Ok(text);
                }
                Err(TranscriptionError::Unauthorized) => return Err(TranscriptionError::Unauthorized),
                Err(e) => {
                    warn!("Transcription as {} failed: {}", format.extension(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TranscriptionError::Api("no recording formats".to_string())))
    }
}

fn classify(status: StatusCode, body: String) -> TranscriptionError {
    match status.as_u16() {
        401 | 403 => TranscriptionError::Unauthorized,
        429 => TranscriptionError::RateLimited,
        500 | 502 | 503 | 504 => TranscriptionError::Transient(format!("{} - {}", status, body)),
        _ => TranscriptionError::Api(format!("{} - {}", status, body)),
    }
}
