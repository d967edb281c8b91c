//! Call flow state machine
//!
//! Handles one webhook event per call at a time: updates the caller's session,
//! prepares the prompts to play and decides whether to listen, record or hang up.

use crate::config::Config;
use crate::database::{CompletionSink, InterviewRecord, Outcome};
use crate::session::{CallSession, CallState, Progress, SessionStatus, SessionStore};
use crate::transcriber::{is_usable, Transcriber};
use crate::tts::{CachedAudio, SpeechSynthesizer};
use crate::twiml::{actions, VoiceResponse};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Fixed prompts played around the questions
pub mod prompts {
    pub const WELCOME: &str = "Welkom bij onze logistieke intake lijn.";
    pub const ACKNOWLEDGE: &str = "Bedankt.";
    pub const REPROMPT: &str = "Sorry, dat heb ik niet goed verstaan. Wilt u uw antwoord na de piep inspreken?";
    pub const CLOSING: &str = "Bedankt voor uw antwoorden. Wij nemen zo snel mogelijk contact met u op.";
    pub const GIVE_UP: &str =
        "Het lukt helaas niet om uw antwoord te verstaan. Wij nemen zo snel mogelijk contact met u op. Tot ziens.";
    pub const UNIDENTIFIED_CALL: &str = "Er is een technische storing opgetreden. Probeer het later opnieuw.";
}

/// Inbound telephony events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Started,
    /// Live recognition finished; the text may be missing or empty
    SpeechResult(Option<String>),
    /// A fallback recording is available at this base URL
    RecordingReady(Option<String>),
}

impl CallEvent {
    fn name(&self) -> &'static str {
        match self {
            CallEvent::Started => "call-started",
            CallEvent::SpeechResult(_) => "speech-result",
            CallEvent::RecordingReady(_) => "recording-ready",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub questions: Vec<String>,
    pub language: String,
    /// Prefix for audio URLs handed to the platform
    pub public_base_url: String,
    pub max_recording_attempts: u32,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            questions: config.questions.clone(),
            language: config.language.clone(),
            public_base_url: config.public_base_url.clone(),
            max_recording_attempts: config.max_recording_attempts,
        }
    }
}

/// What one event produced
#[derive(Debug, Clone)]
pub struct Turn {
    pub response: VoiceResponse,
    pub state: CallState,
    pub question_index: usize,
}

/// Interview orchestrator shared by all webhook handlers
pub struct CallFlow {
    sessions: Arc<SessionStore>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    transcriber: Arc<dyn Transcriber>,
    sink: Arc<dyn CompletionSink>,
    settings: FlowSettings,
}

impl CallFlow {
    pub fn new(
        sessions: Arc<SessionStore>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        transcriber: Arc<dyn Transcriber>,
        sink: Arc<dyn CompletionSink>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            sessions,
            synthesizer,
            transcriber,
            sink,
            settings,
        }
    }

    #[cfg(test)]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Number of calls with a live session
    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }

    /// Process one event and return the instructions for the platform.
    ///
    /// Never fails: upstream problems degrade the turn instead.
    pub async fn handle(&self, call_id: &str, event: CallEvent) -> Turn {
        let (mut session, created) = self.sessions.acquire(call_id).await;
        session.touch();

        let event = if created && event != CallEvent::Started {
            warn!("[{}] {} for unknown call, starting interview", call_id, event.name());
            CallEvent::Started
        } else {
            event
        };
        debug!("[{}] {} in {:?}", call_id, event.name(), session.state);

        let mut response = VoiceResponse::new();
        match event {
            CallEvent::Started => self.start(&mut session, created, &mut response).await,
            CallEvent::SpeechResult(text) => self.on_speech(&mut session, text, &mut response).await,
            CallEvent::RecordingReady(url) => self.on_recording(&mut session, url, &mut response).await,
        }

        let turn = Turn {
            response,
            state: session.state,
            question_index: session.question_index,
        };

        // Removed while still locked so queued events for this id start over
        if session.status() == SessionStatus::Complete {
            self.sessions.remove_locked(&session);
        }
        turn
    }

    /// Answer a webhook that does not say which call it belongs to
    pub async fn reject_unidentified(&self) -> VoiceResponse {
        let mut response = VoiceResponse::new();
        self.speak(&mut response, prompts::UNIDENTIFIED_CALL).await;
        response.hangup();
        response
    }

    async fn start(&self, session: &mut CallSession, created: bool, response: &mut VoiceResponse) {
        if created || session.state == CallState::Init {
            info!("[{}] Call started", session.id);
            self.speak(response, prompts::WELCOME).await;
        } else {
            info!(
                "[{}] Repeated call start, asking question {} again",
                session.id,
                session.question_index + 1
            );
        }
        self.ask_current(session, response).await;
    }

    async fn on_speech(&self, session: &mut CallSession, text: Option<String>, response: &mut VoiceResponse) {
        if session.state == CallState::AwaitingRecording {
            debug!("[{}] Speech result while a recording was expected", session.id);
        }

        let text = text.map(|t| t.trim().to_string()).unwrap_or_default();
        if is_usable(&text) {
            self.accept_answer(session, text, response).await;
            return;
        }

        info!(
            "[{}] No speech recognized for question {}, switching to recording",
            session.id,
            session.question_index + 1
        );
        self.request_recording(session, response).await;
    }

    async fn on_recording(&self, session: &mut CallSession, url: Option<String>, response: &mut VoiceResponse) {
        let transcript = match url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => match self.transcriber.transcribe(url, &self.settings.language).await {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!("[{}] Transcription failed: {}", session.id, e);
                    String::new()
                }
            },
            None => {
                warn!("[{}] Recording event without a recording URL", session.id);
                String::new()
            }
        };

        if is_usable(&transcript) {
            self.accept_answer(session, transcript, response).await;
            return;
        }

        let failures = session.record_failed_recording();
        if failures >= self.settings.max_recording_attempts {
            warn!(
                "[{}] {} unusable recordings for question {}, ending call",
                session.id,
                failures,
                session.question_index + 1
            );
            self.give_up(session, response).await;
        } else {
            info!("[{}] Unusable recording ({} so far), asking again", session.id, failures);
            self.request_recording(session, response).await;
        }
    }

    async fn accept_answer(&self, session: &mut CallSession, answer: String, response: &mut VoiceResponse) {
        debug!("[{}] Answer {}: {:?}", session.id, session.question_index + 1, answer);
        match session.record_answer(answer, self.settings.questions.len()) {
            Progress::NextQuestion(_) => {
                self.speak(response, prompts::ACKNOWLEDGE).await;
                self.ask_current(session, response).await;
            }
            Progress::Finished => self.finish(session, response).await,
        }
    }

    async fn ask_current(&self, session: &mut CallSession, response: &mut VoiceResponse) {
        match self.settings.questions.get(session.question_index) {
            Some(question) => {
                self.speak(response, question).await;
                response.gather_speech(actions::SPEECH_RESULT, &self.settings.language);
                session.state = CallState::AwaitingSpeech;
            }
            None => self.finish(session, response).await,
        }
    }

    async fn request_recording(&self, session: &mut CallSession, response: &mut VoiceResponse) {
        self.speak(response, prompts::REPROMPT).await;
        response.record(actions::RECORDING_READY);
        session.state = CallState::AwaitingRecording;
    }

    async fn finish(&self, session: &mut CallSession, response: &mut VoiceResponse) {
        info!(
            "[{}] Interview complete after {}s",
            session.id,
            (Utc::now() - session.created_at).num_seconds()
        );
        self.speak(response, prompts::CLOSING).await;
        response.hangup();
        session.state = CallState::Complete;
        self.submit(session, Outcome::Complete).await;
    }

    async fn give_up(&self, session: &mut CallSession, response: &mut VoiceResponse) {
        self.speak(response, prompts::GIVE_UP).await;
        response.hangup();
        session.state = CallState::Complete;
        self.submit(session, Outcome::Abandoned).await;
    }

    /// Hand the answers to the sink; failures are logged, never shown to the caller
    async fn submit(&self, session: &CallSession, outcome: Outcome) {
        let record = InterviewRecord {
            call_sid: session.id.clone(),
            answers: session.answers.clone(),
            outcome,
        };
        if let Err(e) = self.sink.submit(&record).await {
            error!(
                "[{}] Failed to persist {} interview: {}. Answers: {:?}",
                session.id,
                outcome.as_str(),
                e,
                record.answers
            );
        }
    }

    /// Play synthesized audio, or fall back to the platform's own speech
    async fn speak(&self, response: &mut VoiceResponse, text: &str) {
        match self.synthesizer.synthesize(text).await {
            Ok(audio) => {
                response.play(&self.audio_url(&audio));
            }
            Err(e) => {
                warn!("Synthesis failed, using platform speech: {}", e);
                response.say(text, &self.settings.language);
            }
        }
    }

    fn audio_url(&self, audio: &CachedAudio) -> String {
        format!("{}/audio/{}", self.settings.public_base_url, audio.file_name())
    }

    /// Drop sessions that stopped sending events and keep their partial answers
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let drained = self.sessions.drain_idle(max_idle);
        for session in &drained {
            warn!(
                "[{}] Call abandoned after {} of {} questions",
                session.id,
                session.answers.len(),
                self.settings.questions.len()
            );
            if !session.answers.is_empty() {
                self.submit(session, Outcome::Abandoned).await;
            }
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseError;
    use crate::transcriber::TranscriptionError;
    use crate::tts::SynthesisError;
    use crate::twiml::Verb;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeSynthesizer {
        spoken: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<CachedAudio, SynthesisError> {
            self.spoken.lock().push(text.to_string());
            if self.fail {
                return Err(SynthesisError::ConfigMissing("voice id"));
            }
            let fingerprint = format!("{:016x}", text.len());
            Ok(CachedAudio {
                path: PathBuf::from(format!("/cache/{}.mp3", fingerprint)),
                fingerprint,
            })
        }
    }

    #[derive(Default)]
    struct FakeTranscriber {
        results: Mutex<VecDeque<Result<String, TranscriptionError>>>,
        urls: Mutex<Vec<String>>,
    }

    impl FakeTranscriber {
        fn answering(results: Vec<Result<String, TranscriptionError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, recording_url: &str, _language: &str) -> Result<String, TranscriptionError> {
            self.urls.lock().push(recording_url.to_string());
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TranscriptionError::Transient("no audio".to_string())))
        }
    }

    #[derive(Default)]
    struct FakeSink {
        records: Mutex<Vec<InterviewRecord>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionSink for FakeSink {
        async fn submit(&self, record: &InterviewRecord) -> Result<(), DatabaseError> {
            self.records.lock().push(record.clone());
            if self.fail {
                return Err(DatabaseError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            Ok(())
        }
    }

    struct Harness {
        flow: CallFlow,
        synthesizer: Arc<FakeSynthesizer>,
        transcriber: Arc<FakeTranscriber>,
        sink: Arc<FakeSink>,
    }

    fn harness_with(synthesizer: FakeSynthesizer, transcriber: FakeTranscriber, sink: FakeSink) -> Harness {
        let synthesizer = Arc::new(synthesizer);
        let transcriber = Arc::new(transcriber);
        let sink = Arc::new(sink);
        let flow = CallFlow::new(
            Arc::new(SessionStore::new()),
            synthesizer.clone(),
            transcriber.clone(),
            sink.clone(),
            FlowSettings {
                questions: vec!["Vraag een?".into(), "Vraag twee?".into(), "Vraag drie?".into()],
                language: "nl-NL".to_string(),
                public_base_url: "https://intake.example.com".to_string(),
                max_recording_attempts: 3,
            },
        );
        Harness {
            flow,
            synthesizer,
            transcriber,
            sink,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeSynthesizer::default(), FakeTranscriber::default(), FakeSink::default())
    }

    fn speech(text: &str) -> CallEvent {
        CallEvent::SpeechResult(Some(text.to_string()))
    }

    fn recording(url: &str) -> CallEvent {
        CallEvent::RecordingReady(Some(url.to_string()))
    }

    #[tokio::test]
    async fn test_full_interview_over_live_speech() {
        let h = harness();

        let turn = h.flow.handle("CA1", CallEvent::Started).await;
        assert_eq!(turn.state, CallState::AwaitingSpeech);
        assert_eq!(turn.question_index, 0);

        h.flow.handle("CA1", speech("import")).await;
        h.flow.handle("CA1", speech("zee")).await;
        let last = h.flow.handle("CA1", speech("Nederland naar Duitsland")).await;

        assert_eq!(last.state, CallState::Complete);
        assert_eq!(last.question_index, 3);
        assert_eq!(last.response.instruction(), Some(&Verb::Hangup));

        let records = h.sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].answers, vec!["import", "zee", "Nederland naar Duitsland"]);
        assert_eq!(records[0].outcome, Outcome::Complete);
        assert!(h.flow.sessions().get("CA1").is_none());
    }

    #[tokio::test]
    async fn test_empty_speech_switches_to_recording() {
        let h = harness();
        h.flow.handle("CA1", CallEvent::Started).await;

        let turn = h.flow.handle("CA1", speech("")).await;
        assert_eq!(turn.state, CallState::AwaitingRecording);
        assert_eq!(turn.question_index, 0);
        assert!(matches!(turn.response.instruction(), Some(Verb::Record { action }) if action == "/handle-recording"));

        let turn = h.flow.handle("CA1", CallEvent::SpeechResult(None)).await;
        assert_eq!(turn.state, CallState::AwaitingRecording);
        assert_eq!(turn.question_index, 0);
    }

    #[tokio::test]
    async fn test_recording_answer_returns_to_live_speech() {
        let h = harness_with(
            FakeSynthesizer::default(),
            FakeTranscriber::answering(vec![Ok("  beide  ".to_string())]),
            FakeSink::default(),
        );
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA1", speech("   ")).await;

        let turn = h.flow.handle("CA1", recording("https://api.example.com/Recordings/RE1")).await;
        assert_eq!(turn.state, CallState::AwaitingSpeech);
        assert_eq!(turn.question_index, 1);
        assert_eq!(*h.transcriber.urls.lock(), vec!["https://api.example.com/Recordings/RE1"]);

        let session = h.flow.sessions().get("CA1").unwrap();
        assert_eq!(session.lock().await.answers, vec!["beide"]);
    }

    #[tokio::test]
    async fn test_recorded_answers_are_stored_trimmed() {
        let h = harness_with(
            FakeSynthesizer::default(),
            FakeTranscriber::answering(vec![
                Ok("\n zee \t".to_string()),
                Ok(" Nederland ".to_string()),
                Ok("weg\n".to_string()),
            ]),
            FakeSink::default(),
        );
        h.flow.handle("CA1", CallEvent::Started).await;
        for url in ["https://rec/RE1", "https://rec/RE2", "https://rec/RE3"] {
            h.flow.handle("CA1", speech("")).await;
            h.flow.handle("CA1", recording(url)).await;
        }

        let records = h.sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].answers, vec!["zee", "Nederland", "weg"]);
        assert_eq!(records[0].outcome, Outcome::Complete);
    }

    #[tokio::test]
    async fn test_acknowledgment_precedes_next_question() {
        let h = harness();
        h.flow.handle("CA1", CallEvent::Started).await;
        h.synthesizer.spoken.lock().clear();

        let turn = h.flow.handle("CA1", speech("import")).await;
        assert_eq!(*h.synthesizer.spoken.lock(), vec![prompts::ACKNOWLEDGE, "Vraag twee?"]);

        let verbs = turn.response.verbs();
        assert_eq!(verbs.len(), 3);
        assert!(matches!(&verbs[0], Verb::Play { url } if url.starts_with("https://intake.example.com/audio/")));
        assert!(matches!(&verbs[1], Verb::Play { .. }));
        assert!(matches!(&verbs[2], Verb::Gather { action, .. } if action == "/speech"));
    }

    #[tokio::test]
    async fn test_unusable_recordings_end_the_call_after_bound() {
        let h = harness_with(
            FakeSynthesizer::default(),
            FakeTranscriber::answering(vec![
                Ok("...".to_string()),
                Err(TranscriptionError::Unauthorized),
                Ok(String::new()),
            ]),
            FakeSink::default(),
        );
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA1", speech("import")).await;
        h.flow.handle("CA1", speech("")).await;

        let first = h.flow.handle("CA1", recording("https://rec/RE1")).await;
        assert_eq!(first.state, CallState::AwaitingRecording);
        let second = h.flow.handle("CA1", recording("https://rec/RE2")).await;
        assert_eq!(second.state, CallState::AwaitingRecording);
        assert_eq!(second.question_index, 1);

        let last = h.flow.handle("CA1", recording("https://rec/RE3")).await;
        assert_eq!(last.state, CallState::Complete);
        assert_eq!(last.response.instruction(), Some(&Verb::Hangup));
        assert!(h.synthesizer.spoken.lock().contains(&prompts::GIVE_UP.to_string()));

        let records = h.sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Abandoned);
        assert_eq!(records[0].answers, vec!["import"]);
        assert_eq!(h.flow.active_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_recording_url_counts_as_unusable() {
        let h = harness();
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA1", speech("")).await;

        let turn = h.flow.handle("CA1", CallEvent::RecordingReady(None)).await;
        assert_eq!(turn.state, CallState::AwaitingRecording);
        assert!(h.transcriber.urls.lock().is_empty());

        let session = h.flow.sessions().get("CA1").unwrap();
        assert_eq!(session.lock().await.failed_recordings, 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_uses_platform_speech() {
        let h = harness_with(
            FakeSynthesizer {
                fail: true,
                ..Default::default()
            },
            FakeTranscriber::default(),
            FakeSink::default(),
        );

        let turn = h.flow.handle("CA1", CallEvent::Started).await;
        let verbs = turn.response.verbs();
        assert_eq!(
            verbs[0],
            Verb::Say {
                text: prompts::WELCOME.to_string(),
                language: "nl-NL".to_string()
            }
        );
        assert!(matches!(&verbs[1], Verb::Say { text, .. } if text == "Vraag een?"));
        assert!(matches!(&verbs[2], Verb::Gather { .. }));
    }

    #[tokio::test]
    async fn test_persistence_failure_still_closes_call() {
        let h = harness_with(
            FakeSynthesizer::default(),
            FakeTranscriber::default(),
            FakeSink {
                fail: true,
                ..Default::default()
            },
        );
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA1", speech("import")).await;
        h.flow.handle("CA1", speech("zee")).await;
        let last = h.flow.handle("CA1", speech("weg")).await;

        assert_eq!(last.state, CallState::Complete);
        assert_eq!(h.synthesizer.spoken.lock().last().unwrap(), prompts::CLOSING);
        assert_eq!(h.sink.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_calls_stay_isolated() {
        let h = Arc::new(harness());
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA2", CallEvent::Started).await;

        let mut tasks = Vec::new();
        for (call, answers) in [("CA1", ["a1", "a2", "a3"]), ("CA2", ["b1", "b2", "b3"])] {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                for answer in answers {
                    h.flow.handle(call, speech(answer)).await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let records = h.sink.records.lock();
        assert_eq!(records.len(), 2);
        for record in records.iter() {
            let prefix = if record.call_sid == "CA1" { "a" } else { "b" };
            assert!(record.answers.iter().all(|a| a.starts_with(prefix)));
            assert_eq!(record.answers.len(), 3);
        }
    }

    #[tokio::test]
    async fn test_question_index_never_decreases() {
        let h = harness_with(
            FakeSynthesizer::default(),
            FakeTranscriber::answering(vec![Ok(String::new()), Ok("lucht".to_string())]),
            FakeSink::default(),
        );
        let events = vec![
            CallEvent::Started,
            speech(""),
            recording("https://rec/RE1"),
            CallEvent::Started,
            recording("https://rec/RE2"),
            speech(""),
            speech("Belgie"),
            speech("Frankrijk"),
        ];

        let mut last_index = 0;
        for event in events {
            let turn = h.flow.handle("CA1", event).await;
            assert!(turn.question_index >= last_index);
            assert!(turn.question_index <= 3);
            last_index = turn.question_index;
        }
        assert_eq!(last_index, 3);
        assert_eq!(h.sink.records.lock()[0].answers, vec!["lucht", "Belgie", "Frankrijk"]);
    }

    #[tokio::test]
    async fn test_repeated_start_does_not_reset_progress() {
        let h = harness();
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA1", speech("import")).await;
        h.synthesizer.spoken.lock().clear();

        let turn = h.flow.handle("CA1", CallEvent::Started).await;
        assert_eq!(turn.question_index, 1);
        assert_eq!(*h.synthesizer.spoken.lock(), vec!["Vraag twee?"]);
    }

    #[tokio::test]
    async fn test_event_for_unknown_call_starts_interview() {
        let h = harness();
        let turn = h.flow.handle("CA7", speech("import")).await;

        assert_eq!(turn.state, CallState::AwaitingSpeech);
        assert_eq!(turn.question_index, 0);
        assert_eq!(h.synthesizer.spoken.lock()[0], prompts::WELCOME);
    }

    #[tokio::test]
    async fn test_completed_call_id_starts_fresh() {
        let h = harness();
        for event in [CallEvent::Started, speech("a"), speech("b"), speech("c")] {
            h.flow.handle("CA1", event).await;
        }

        let turn = h.flow.handle("CA1", CallEvent::Started).await;
        assert_eq!(turn.state, CallState::AwaitingSpeech);
        assert_eq!(turn.question_index, 0);
        assert_eq!(h.sink.records.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_idle_keeps_partial_answers() {
        let h = harness();
        h.flow.handle("CA1", CallEvent::Started).await;
        h.flow.handle("CA1", speech("import")).await;
        h.flow.handle("CA2", CallEvent::Started).await;

        for id in ["CA1", "CA2"] {
            let session = h.flow.sessions().get(id).unwrap();
            session.lock().await.last_activity = chrono::Utc::now() - chrono::Duration::hours(1);
        }

        let swept = h.flow.sweep_idle(Duration::from_secs(900)).await;
        assert_eq!(swept, 2);
        assert_eq!(h.flow.active_calls(), 0);

        let records = h.sink.records.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].call_sid, "CA1");
        assert_eq!(records[0].outcome, Outcome::Abandoned);
    }
}
