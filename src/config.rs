//! Configuration management for the intake line
//!
//! Loads settings from environment variables (.env file)

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Default interview when `INTERVIEW_QUESTIONS` is not set
pub const DEFAULT_QUESTIONS: [&str; 3] = [
    "Doet u import, export of beide?",
    "Welke transportmodi gebruikt u het meest: zee, lucht of weg?",
    "Van en naar welke landen vervoert u voornamelijk?",
];

/// Speech synthesis settings
#[derive(Debug, Clone)]
pub struct TtsSettings {
    /// ElevenLabs API key
    pub api_key: Option<String>,
    /// Voice used when a request does not name one
    pub default_voice_id: Option<String>,
    /// Model used when a request does not name one
    pub default_model_id: String,
    /// API base URL without trailing slash
    pub api_base: String,
    /// Directory holding cached audio artifacts
    pub cache_dir: PathBuf,
    /// Number of artifacts kept by an eviction pass
    pub cache_keep: usize,
}

/// Recording transcription settings
#[derive(Debug, Clone)]
pub struct TranscriptionSettings {
    /// OpenAI-compatible API key
    pub api_key: Option<String>,
    /// API base URL without trailing slash
    pub api_base: String,
    /// Transcription model
    pub model: String,
    /// Telephony account SID, used to download recordings
    pub account_sid: Option<String>,
    /// Telephony auth token, used to download recordings
    pub auth_token: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the webhook server listens on
    pub bind_addr: String,
    /// Public URL prefix for audio played back to callers
    pub public_base_url: String,
    pub tts: TtsSettings,
    pub transcription: TranscriptionSettings,
    /// BCP-47 tag for recognition and fallback speech
    pub language: String,
    /// Ordered interview questions
    pub questions: Vec<String>,
    /// Unusable recordings tolerated per question before giving up
    pub max_recording_attempts: u32,
    /// Sessions idle longer than this are treated as abandoned
    pub session_idle_timeout: Duration,
    /// Period of the cache eviction and idle sweep
    pub maintenance_interval: Duration,
    /// SQLite database for completed interviews
    pub database_path: PathBuf,
    /// Bearer token for `/interviews`; the endpoint is disabled when unset
    pub operator_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or_default = |key: &str, default: &str| optional(key).unwrap_or_else(|| default.to_string());

        let questions = match optional("INTERVIEW_QUESTIONS") {
            Some(raw) => {
                let questions: Vec<String> = raw
                    .split('|')
                    .map(|q| q.trim().to_string())
                    .filter(|q| !q.is_empty())
                    .collect();
                if questions.is_empty() {
                    return Err(ConfigError::InvalidValue("INTERVIEW_QUESTIONS".to_string(), raw));
                }
                questions
            }
            None => DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect(),
        };

        let cache_keep: usize = parse_or("AUDIO_CACHE_KEEP", optional("AUDIO_CACHE_KEEP"), 200)?;
        if cache_keep == 0 {
            return Err(ConfigError::InvalidValue("AUDIO_CACHE_KEEP".to_string(), "0".to_string()));
        }

        let max_recording_attempts: u32 =
            parse_or("MAX_RECORDING_ATTEMPTS", optional("MAX_RECORDING_ATTEMPTS"), 3)?;
        if max_recording_attempts == 0 {
            return Err(ConfigError::InvalidValue("MAX_RECORDING_ATTEMPTS".to_string(), "0".to_string()));
        }

        let idle_secs: u64 = parse_or("SESSION_IDLE_TIMEOUT_SECS", optional("SESSION_IDLE_TIMEOUT_SECS"), 900)?;
        let maintenance_secs: u64 =
            parse_or("MAINTENANCE_INTERVAL_SECS", optional("MAINTENANCE_INTERVAL_SECS"), 300)?;

        Ok(Self {
            bind_addr: or_default("BIND_ADDR", "0.0.0.0:5000"),
            public_base_url: optional("PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            tts: TtsSettings {
                api_key: optional("ELEVENLABS_API_KEY"),
                default_voice_id: optional("ELEVENLABS_VOICE_ID"),
                default_model_id: or_default("ELEVENLABS_MODEL_ID", models::ELEVEN_MULTILINGUAL_V2),
                api_base: or_default("ELEVENLABS_API_BASE", "https://api.elevenlabs.io/v1")
                    .trim_end_matches('/')
                    .to_string(),
                cache_dir: or_default("AUDIO_CACHE_DIR", "audio_cache").into(),
                cache_keep,
            },
            transcription: TranscriptionSettings {
                api_key: optional("OPENAI_API_KEY"),
                api_base: or_default("OPENAI_API_BASE", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                model: or_default("TRANSCRIPTION_MODEL", models::WHISPER_1),
                account_sid: optional("TWILIO_ACCOUNT_SID"),
                auth_token: optional("TWILIO_AUTH_TOKEN"),
            },
            language: or_default("SPEECH_LANGUAGE", "nl-NL"),
            questions,
            max_recording_attempts,
            session_idle_timeout: Duration::from_secs(idle_secs),
            maintenance_interval: Duration::from_secs(maintenance_secs.max(1)),
            database_path: or_default("DATABASE_PATH", "intake_leads.db").into(),
            operator_token: optional("OPERATOR_TOKEN"),
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(s) => s
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), s)),
        None => Ok(default),
    }
}

/// Upstream model identifiers
pub mod models {
    pub const ELEVEN_MULTILINGUAL_V2: &str = "eleven_multilingual_v2";
    pub const WHISPER_1: &str = "whisper-1";
}
