//! Telephony webhook server and background maintenance

use crate::call_flow::{CallEvent, CallFlow, FlowSettings, Turn};
use crate::config::Config;
use crate::database::Database;
use crate::session::SessionStore;
use crate::transcriber::WhisperTranscriber;
use crate::tts::{AudioCache, AUDIO_EXTENSION};
use crate::twiml::actions;
use axum::extract::{Form, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rows returned by `/interviews` when no limit is given
const DEFAULT_INTERVIEW_LIMIT: usize = 20;
const MAX_INTERVIEW_LIMIT: usize = 500;

/// State shared across handlers
pub struct AppState {
    pub flow: Arc<CallFlow>,
    pub db: Arc<Database>,
    pub cache_dir: PathBuf,
    pub operator_token: Option<String>,
}

// Every field is optional so a malformed webhook still gets a TwiML answer

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallStartedForm {
    #[serde(default)]
    call_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SpeechForm {
    #[serde(default)]
    call_sid: Option<String>,
    #[serde(default)]
    speech_result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordingForm {
    #[serde(default)]
    call_sid: Option<String>,
    #[serde(default)]
    recording_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterviewsQuery {
    limit: Option<usize>,
}

/// Build the webhook router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/interviews", get(recent_interviews))
        .route(actions::CALL_STARTED, post(call_started))
        .route(actions::SPEECH_RESULT, post(speech_result))
        .route(actions::RECORDING_READY, post(recording_ready))
        .route("/audio/:file", get(serve_audio))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_calls": state.flow.active_calls(),
    }))
}

/// Latest stored interviews for operator follow-up
async fn recent_interviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<InterviewsQuery>,
) -> Response {
    let Some(token) = state.operator_token.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(token) {
        warn!("Rejected /interviews request without a valid operator token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_INTERVIEW_LIMIT)
        .min(MAX_INTERVIEW_LIMIT);

    let db = state.db.clone();
    match tokio::task::spawn_blocking(move || db.recent(limit)).await {
        Ok(Ok(interviews)) => Json(interviews).into_response(),
        Ok(Err(e)) => {
            error!("Failed to read interviews: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!("Interview query task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn respond(call_sid: &str, turn: Turn) -> Response {
    debug!(
        "[{}] Now {:?} at question {}, next: {:?}",
        call_sid,
        turn.state,
        turn.question_index + 1,
        turn.response.instruction()
    );
    xml(turn.response.to_xml())
}

fn call_sid(raw: Option<String>, webhook: &str) -> Option<String> {
    let sid = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    if sid.is_none() {
        warn!("{} webhook without a CallSid", webhook);
    }
    sid
}

async fn call_started(State(state): State<Arc<AppState>>, Form(form): Form<CallStartedForm>) -> Response {
    let Some(sid) = call_sid(form.call_sid, actions::CALL_STARTED) else {
        return xml(state.flow.reject_unidentified().await.to_xml());
    };
    respond(&sid, state.flow.handle(&sid, CallEvent::Started).await)
}

async fn speech_result(State(state): State<Arc<AppState>>, Form(form): Form<SpeechForm>) -> Response {
    let Some(sid) = call_sid(form.call_sid, actions::SPEECH_RESULT) else {
        return xml(state.flow.reject_unidentified().await.to_xml());
    };
    respond(
        &sid,
        state
            .flow
            .handle(&sid, CallEvent::SpeechResult(form.speech_result))
            .await,
    )
}

async fn recording_ready(State(state): State<Arc<AppState>>, Form(form): Form<RecordingForm>) -> Response {
    let Some(sid) = call_sid(form.call_sid, actions::RECORDING_READY) else {
        return xml(state.flow.reject_unidentified().await.to_xml());
    };
    respond(
        &sid,
        state
            .flow
            .handle(&sid, CallEvent::RecordingReady(form.recording_url))
            .await,
    )
}

/// Serve a cached prompt; only bare fingerprint file names are accepted
async fn serve_audio(State(state): State<Arc<AppState>>, Path(file): Path<String>) -> Response {
    if !is_cache_file_name(&file) {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(state.cache_dir.join(&file)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn is_cache_file_name(name: &str) -> bool {
    name.strip_suffix(AUDIO_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .map(|stem| stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Periodically evict old audio and drop abandoned calls
pub fn start_maintenance_loop(
    flow: Arc<CallFlow>,
    cache: Arc<AudioCache>,
    interval: Duration,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let evicting = cache.clone();
            match tokio::task::spawn_blocking(move || evicting.evict()).await {
                Ok(report) if report.removed > 0 || report.failed > 0 => info!(
                    "Audio cache eviction: kept {}, removed {}, failed {}",
                    report.retained, report.removed, report.failed
                ),
                Ok(_) => {}
                Err(e) => error!("Audio cache eviction task failed: {}", e),
            }

            let swept = flow.sweep_idle(idle_timeout).await;
            if swept > 0 {
                info!(
                    "Removed {} idle call sessions, {} still active",
                    swept,
                    flow.active_calls()
                );
            }
        }
    })
}

/// Wire up the components and serve webhooks until shutdown
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cache = Arc::new(AudioCache::new(config.tts.clone())?);
    let transcriber = Arc::new(WhisperTranscriber::new(config.transcription.clone())?);
    let db = Arc::new(Database::open(&config.database_path)?);

    if config.tts.api_key.is_none() || config.tts.default_voice_id.is_none() {
        warn!("ELEVENLABS_API_KEY or ELEVENLABS_VOICE_ID not set; uncached prompts will use platform speech");
    }
    if config.transcription.api_key.is_none() {
        warn!("OPENAI_API_KEY not set; fallback recordings cannot be transcribed");
    }

    let flow = Arc::new(CallFlow::new(
        Arc::new(SessionStore::new()),
        cache.clone(),
        transcriber,
        db.clone(),
        FlowSettings::from_config(&config),
    ));

    let _maintenance = start_maintenance_loop(
        flow.clone(),
        cache,
        config.maintenance_interval,
        config.session_idle_timeout,
    );

    let state = Arc::new(AppState {
        flow,
        db,
        cache_dir: config.tts.cache_dir.clone(),
        operator_token: config.operator_token.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening for telephony webhooks on {}", config.bind_addr);
    axum::serve(listener, router(state)).await?;

    Ok(())
}
