//! Speech synthesis with an on-disk audio cache
//!
//! Calls the ElevenLabs text-to-speech API and stores each result under a
//! fingerprint of the request, so a prompt is only synthesized once.

use crate::config::TtsSettings;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const XI_API_KEY_HEADER: &str = "xi-api-key";

/// Extension of every cached artifact
pub const AUDIO_EXTENSION: &str = "mp3";

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Nothing to synthesize")]
    EmptyText,
    #[error("Missing synthesis configuration: {0}")]
    ConfigMissing(&'static str),
    #[error("Synthesis API rejected the credentials")]
    Unauthorized,
    #[error("Synthesis API rate limit exceeded")]
    RateLimited,
    #[error("Transient synthesis failure: {0}")]
    TransientNetwork(String),
    #[error("Synthesis API error {0}: {1}")]
    Upstream(StatusCode, String),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Voice style parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

/// A synthesized prompt stored in the cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAudio {
    pub fingerprint: String,
    pub path: PathBuf,
}

impl CachedAudio {
    /// File name under which the audio endpoint serves this artifact
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.fingerprint, AUDIO_EXTENSION)
    }
}

/// Bounded retry with exponential backoff for transient upstream failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Outcome of a cache eviction pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvictionReport {
    pub retained: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Turns prompt text into a playable artifact
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<CachedAudio, SynthesisError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

enum AttemptError {
    Retryable(SynthesisError),
    Fatal(SynthesisError),
}

/// ElevenLabs client backed by a fingerprint-addressed file cache
pub struct AudioCache {
    client: Client,
    settings: TtsSettings,
    voice_settings: VoiceSettings,
    retry: RetryPolicy,
}

impl AudioCache {
    /// Create the cache, making sure its directory exists
    pub fn new(settings: TtsSettings) -> Result<Self, SynthesisError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()?;

        fs::create_dir_all(&settings.cache_dir)?;

        Ok(Self {
            client,
            settings,
            voice_settings: VoiceSettings::default(),
            retry: RetryPolicy::default(),
        })
    }

    #[cfg(test)]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Collapse whitespace so cosmetic differences share one artifact
    pub fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Content digest identifying the artifact for a request
    pub fn fingerprint(text: &str, voice_id: &str, model_id: &str, style: &VoiceSettings) -> String {
        let mut hasher = Sha256::new();
        hasher.update(Self::normalize(text).as_bytes());
        hasher.update(b"\x1f");
        hasher.update(voice_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(model_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(format!("{:.3}/{:.3}", style.stability, style.similarity_boost).as_bytes());

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>()
    }

    pub fn artifact_path(&self, fingerprint: &str) -> PathBuf {
        self.settings
            .cache_dir
            .join(format!("{}.{}", fingerprint, AUDIO_EXTENSION))
    }

    /// Synthesize `text`, serving it from the cache when possible
    pub async fn synthesize_with(
        &self,
        text: &str,
        voice_id: Option<&str>,
        model_id: Option<&str>,
        style: Option<VoiceSettings>,
    ) -> Result<CachedAudio, SynthesisError> {
        let normalized = Self::normalize(text);
        if normalized.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let voice = voice_id
            .filter(|v| !v.trim().is_empty())
            .or(self.settings.default_voice_id.as_deref())
            .ok_or(SynthesisError::ConfigMissing("voice id"))?;
        let model = model_id
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.settings.default_model_id.as_str());
        let style = style.unwrap_or(self.voice_settings);

        let fingerprint = Self::fingerprint(&normalized, voice, model, &style);
        let path = self.artifact_path(&fingerprint);

        if is_complete_artifact(&path).await {
            debug!("Cache hit for {}", fingerprint);
            return Ok(CachedAudio { fingerprint, path });
        }

        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(SynthesisError::ConfigMissing("API key"))?;

        let request = SpeechRequest {
            text: &normalized,
            model_id: model,
            voice_settings: style,
        };

        let mut attempt = 1;
        loop {
            match self.fetch_into(&path, api_key, voice, &request).await {
                Ok(bytes) => {
                    info!("Synthesized {} ({} bytes)", fingerprint, bytes);
                    return Ok(CachedAudio { fingerprint, path });
                }
                Err(AttemptError::Retryable(e)) if attempt < self.retry.attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Synthesis attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.retry.attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptError::Retryable(e)) | Err(AttemptError::Fatal(e)) => return Err(e),
            }
        }
    }

    async fn fetch_into(
        &self,
        target: &Path,
        api_key: &str,
        voice_id: &str,
        request: &SpeechRequest<'_>,
    ) -> Result<u64, AttemptError> {
        let url = format!("{}/text-to-speech/{}", self.settings.api_base, voice_id);

        let response = self
            .client
            .post(&url)
            .header(XI_API_KEY_HEADER, api_key)
            .header(ACCEPT, "audio/mpeg")
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(SynthesisError::TransientNetwork(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, body));
        }

        self.write_atomically(target, response).await
    }

    /// Stream the body into a temp file next to `target`, then rename it into place
    async fn write_atomically(&self, target: &Path, response: Response) -> Result<u64, AttemptError> {
        let io_error = |e: std::io::Error| AttemptError::Fatal(SynthesisError::Io(e));

        let temp = tempfile::Builder::new()
            .prefix(".tts-")
            .suffix(".part")
            .tempfile_in(&self.settings.cache_dir)
            .map_err(io_error)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| AttemptError::Retryable(SynthesisError::TransientNetwork(e.to_string())))?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }

        if written == 0 {
            return Err(AttemptError::Retryable(SynthesisError::TransientNetwork(
                "empty audio body".to_string(),
            )));
        }

        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        temp_path.persist(target).map_err(|e| io_error(e.error))?;
        Ok(written)
    }

    /// Keep the most recently modified artifacts, delete the rest
    pub fn evict(&self) -> EvictionReport {
        evict_dir(&self.settings.cache_dir, self.settings.cache_keep)
    }
}

#[async_trait]
impl SpeechSynthesizer for AudioCache {
    async fn synthesize(&self, text: &str) -> Result<CachedAudio, SynthesisError> {
        self.synthesize_with(text, None, None, None).await
    }
}

fn classify_failure(status: StatusCode, body: String) -> AttemptError {
    match status.as_u16() {
        401 | 403 => AttemptError::Fatal(SynthesisError::Unauthorized),
        429 => AttemptError::Retryable(SynthesisError::RateLimited),
        500 | 502 | 503 | 504 => {
            AttemptError::Retryable(SynthesisError::TransientNetwork(format!("upstream status {}", status)))
        }
        _ => AttemptError::Fatal(SynthesisError::Upstream(status, body)),
    }
}

async fn is_complete_artifact(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Delete all but the `keep` newest artifacts in `dir`.
///
/// Individual deletion failures are counted in the report and do not stop the pass.
pub fn evict_dir(dir: &Path, keep: usize) -> EvictionReport {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read audio cache {:?}: {}", dir, e);
            return EvictionReport::default();
        }
    };

    let mut artifacts: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(AUDIO_EXTENSION) {
                return None;
            }
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .collect();

    // Newest first
    artifacts.sort_by(|a, b| b.0.cmp(&a.0));

    let mut report = EvictionReport::default();
    for (index, (_, path)) in artifacts.iter().enumerate() {
        if index < keep {
            report.retained += 1;
            continue;
        }
        match fs::remove_file(path) {
            Ok(_) => {
                debug!("Evicted cached audio {:?}", path);
                report.removed += 1;
            }
            Err(e) => {
                warn!("Failed to evict {:?}: {}", path, e);
                report.failed += 1;
            }
        }
    }

    report
}
