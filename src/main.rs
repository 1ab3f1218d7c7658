use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use realtime_voice_client::{
    EventTranslator, TranscriptLog, VoiceChatConfig, VoiceChatEvent,
    core::realtime::SessionNegotiator,
};

/// Realtime voice-chat client tools
#[derive(Parser, Debug)]
#[command(name = "voice-chat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch a session credential from the configured session endpoint
    Session,

    /// Decode a JSON-lines capture of data-channel frames
    Replay {
        /// Capture file, one frame per line
        file: PathBuf,

        /// Also print the verbatim message events
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Session => {
            let config = load_config(cli.config)?;
            fetch_session(config).await
        }
        Commands::Replay { file, raw } => replay(&file, raw),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<VoiceChatConfig> {
    let config = if let Some(config_path) = path {
        println!("Loading configuration from {}", config_path.display());
        VoiceChatConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        VoiceChatConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };
    Ok(config)
}

async fn fetch_session(config: VoiceChatConfig) -> anyhow::Result<()> {
    info!("Requesting session from {}", config.session_url);

    let negotiator = SessionNegotiator::new(reqwest::Client::new(), config.session_url.clone())
        .with_cookie(config.session_cookie.clone());
    let credential = negotiator
        .fetch()
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    println!("Session secret: {}", credential.masked_secret());
    if let Some(expires_at) = credential.expires_at {
        println!("Expires at:     {expires_at}");
    }
    if credential.tools.is_empty() {
        println!("Server tools:   none");
    } else {
        for tool in &credential.tools {
            println!("Server tool:    {}", tool.name);
        }
    }
    if credential.prompts.is_some() {
        println!("Prompts:        provided");
    }
    Ok(())
}

fn replay(path: &Path, raw: bool) -> anyhow::Result<()> {
    let capture = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut translator = EventTranslator::new();
    let mut transcript = TranscriptLog::new();
    let mut dropped = 0usize;

    for (index, line) in capture.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let events = match translator.translate(line) {
            Ok(events) => events,
            Err(e) => {
                warn!("Line {}: {e}", index + 1);
                dropped += 1;
                continue;
            }
        };

        for event in events {
            transcript.apply(&event);
            if !raw && matches!(event, VoiceChatEvent::Message(_)) {
                continue;
            }
            println!("{} {}", event.name(), event.detail());
        }
    }

    if dropped > 0 {
        println!("Dropped {dropped} undecodable frame(s)");
    }
    if !transcript.is_empty() {
        println!();
        print!("{transcript}");
    }
    Ok(())
}
