//! Intake Line
//!
//! A telephone intake interview: callers answer a fixed list of questions by
//! voice, with cached ElevenLabs prompts, live speech recognition and a
//! record-and-transcribe fallback. Finished interviews are stored in SQLite.

mod call_flow;
mod config;
mod database;
mod server;
mod session;
mod transcriber;
mod tts;
mod twiml;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,intake_line=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Intake line starting...");

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration loaded: {} questions, language {}",
        config.questions.len(),
        config.language
    );

    // Create audio cache directory
    if let Err(e) = std::fs::create_dir_all(&config.tts.cache_dir) {
        error!("Failed to create audio cache directory: {}", e);
        std::process::exit(1);
    }

    // Run the webhook server
    if let Err(e) = server::run(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
