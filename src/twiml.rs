//! TwiML instruction documents returned to the telephony platform

use std::fmt;

/// Webhook paths the platform is told to call next
pub mod actions {
    pub const CALL_STARTED: &str = "/voice";
    pub const SPEECH_RESULT: &str = "/speech";
    pub const RECORDING_READY: &str = "/handle-recording";
}

/// Seconds of silence before a speech gather gives up
pub const GATHER_TIMEOUT_SECS: u32 = 5;
/// Longest answer a fallback recording may hold
pub const RECORD_MAX_LENGTH_SECS: u32 = 30;
/// Seconds of silence that end a fallback recording
pub const RECORD_TIMEOUT_SECS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Platform text-to-speech, used when synthesis is unavailable
    Say { text: String, language: String },
    /// Play a synthesized prompt
    Play { url: String },
    /// Listen for speech and post the result to `action`
    Gather { action: String, language: String },
    /// Record audio and post the recording to `action`
    Record { action: String },
    Hangup,
}

impl Verb {
    pub fn is_prompt(&self) -> bool {
        matches!(self, Verb::Say { .. } | Verb::Play { .. })
    }
}

/// An ordered list of verbs rendered as a `<Response>` document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(&mut self, text: &str, language: &str) -> &mut Self {
        self.verbs.push(Verb::Say {
            text: text.to_string(),
            language: language.to_string(),
        });
        self
    }

    pub fn play(&mut self, url: &str) -> &mut Self {
        self.verbs.push(Verb::Play { url: url.to_string() });
        self
    }

    pub fn gather_speech(&mut self, action: &str, language: &str) -> &mut Self {
        self.verbs.push(Verb::Gather {
            action: action.to_string(),
            language: language.to_string(),
        });
        self
    }

    pub fn record(&mut self, action: &str) -> &mut Self {
        self.verbs.push(Verb::Record {
            action: action.to_string(),
        });
        self
    }

    pub fn hangup(&mut self) -> &mut Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    #[cfg(test)]
    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    /// The trailing listen/record/hangup instruction, if any
    pub fn instruction(&self) -> Option<&Verb> {
        self.verbs.last().filter(|v| !v.is_prompt())
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            match verb {
                Verb::Say { text, language } => {
                    xml.push_str(&format!(
                        r#"<Say language="{}">{}</Say>"#,
                        escape(language),
                        escape(text)
                    ));
                }
                Verb::Play { url } => {
                    xml.push_str(&format!("<Play>{}</Play>", escape(url)));
                }
                Verb::Gather { action, language } => {
                    xml.push_str(&format!(
                        r#"<Gather input="speech" action="{}" method="POST" language="{}" timeout="{}" speechTimeout="auto" actionOnEmptyResult="true"/>"#,
                        escape(action),
                        escape(language),
                        GATHER_TIMEOUT_SECS
                    ));
                }
                Verb::Record { action } => {
                    xml.push_str(&format!(
                        r#"<Record action="{}" method="POST" maxLength="{}" timeout="{}" playBeep="true" trim="trim-silence"/>"#,
                        escape(action),
                        RECORD_MAX_LENGTH_SECS,
                        RECORD_TIMEOUT_SECS
                    ));
                }
                Verb::Hangup => xml.push_str("<Hangup/>"),
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

impl fmt::Display for VoiceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_precede_gather() {
        let mut response = VoiceResponse::new();
        response
            .play("https://intake.example.com/audio/ab.mp3")
            .say("Welke landen?", "nl-NL")
            .gather_speech(actions::SPEECH_RESULT, "nl-NL");

        let xml = response.to_xml();
        let play = xml.find("<Play>").unwrap();
        let say = xml.find("<Say").unwrap();
        let gather = xml.find("<Gather").unwrap();
        assert!(play < say && say < gather);
        assert!(xml.contains(r#"action="/speech""#));
        assert!(xml.contains(r#"actionOnEmptyResult="true""#));
        assert!(xml.ends_with("</Response>"));
        assert_eq!(
            response.instruction(),
            Some(&Verb::Gather {
                action: "/speech".to_string(),
                language: "nl-NL".to_string()
            })
        );
    }

    #[test]
    fn test_record_attributes() {
        let mut response = VoiceResponse::new();
        response.record(actions::RECORDING_READY);
        let xml = response.to_string();
        assert!(xml.contains(r#"<Record action="/handle-recording" method="POST" maxLength="30" timeout="3" playBeep="true""#));
    }

    #[test]
    fn test_text_is_escaped() {
        let mut response = VoiceResponse::new();
        response.say("Import & export <zee>", "nl-NL");
        let xml = response.to_xml();
        assert!(xml.contains("Import &amp; export &lt;zee&gt;"));
        assert!(response.instruction().is_none());
    }
}
