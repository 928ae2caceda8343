use anyhow::Result;
use clap::{Parser, Subcommand};
use loqa_coach::feedback::{render_transcript, score_or_fallback, NatsScorer, SessionScorer};
use loqa_coach::http::{create_router, AppState, FileMediaProvider};
use loqa_coach::{
    ClockOutput, Config, ConnectionState, FileMediaSource, LiveSession, MediaSource, NatsTransport,
    SessionConfig, SessionDetails, SessionMode, Stance,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-coach")]
#[command(about = "Real-time interview and debate coaching sessions")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, global = true, default_value = "config/loqa-coach")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Run a single session headless and print its transcript and feedback
    Run {
        #[arg(long, value_enum, default_value = "interview")]
        mode: SessionMode,

        #[arg(long)]
        role: Option<String>,

        #[arg(long)]
        company: Option<String>,

        #[arg(long)]
        topic: Option<String>,

        #[arg(long, value_enum)]
        stance: Option<Stance>,

        #[arg(long)]
        language: Option<String>,

        /// WAV file replayed as the microphone
        #[arg(long)]
        audio: Option<PathBuf>,

        /// JPEG still served as the camera frame
        #[arg(long)]
        frame: Option<PathBuf>,

        /// Session length in seconds (Ctrl+C ends early)
        #[arg(short, long, default_value = "60")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loqa Coach v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Run {
            mode,
            role,
            company,
            topic,
            stance,
            language,
            audio,
            frame,
            duration,
        } => {
            let config = SessionConfig {
                mode,
                details: SessionDetails {
                    role,
                    company,
                    topic,
                    stance,
                    language,
                },
            };
            run_session(cfg, config, audio, frame, Duration::from_secs(duration)).await
        }
    }
}

fn transport(cfg: &Config) -> Arc<NatsTransport> {
    Arc::new(NatsTransport::new(
        cfg.nats.url.clone(),
        cfg.nats.subject_prefix.clone(),
        cfg.live.outbound_buffer,
    ))
}

async fn scorer(cfg: &Config) -> Option<Arc<dyn SessionScorer>> {
    let subject = cfg.nats.scoring_subject.clone()?;
    match NatsScorer::connect(&cfg.nats.url, subject).await {
        Ok(scorer) => Some(Arc::new(scorer)),
        Err(e) => {
            warn!("Feedback scoring unavailable: {:#}", e);
            None
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = cfg.http_addr();
    let media = FileMediaProvider::new(
        cfg.media.audio_path.clone().map(PathBuf::from),
        cfg.media.frame_path.clone().map(PathBuf::from),
    );

    let state = AppState::new(
        cfg.clone(),
        transport(&cfg),
        Arc::new(media),
        scorer(&cfg).await,
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state)).await?;

    Ok(())
}

async fn run_session(
    cfg: Config,
    config: SessionConfig,
    audio: Option<PathBuf>,
    frame: Option<PathBuf>,
    duration: Duration,
) -> Result<()> {
    let audio = audio.or_else(|| cfg.media.audio_path.clone().map(PathBuf::from));
    let frame = frame.or_else(|| cfg.media.frame_path.clone().map(PathBuf::from));

    let media: Option<Box<dyn MediaSource>> = match audio {
        Some(path) => Some(Box::new(FileMediaSource::open(path, frame.as_deref())?)),
        None => None,
    };

    let session_id = format!("session-{}", uuid::Uuid::new_v4());
    let mut session = LiveSession::new(
        session_id.clone(),
        config.clone(),
        cfg.live_settings(),
        transport(&cfg),
        cfg.api_key(),
    );

    session.connect(media, Box::new(ClockOutput::new())).await?;

    info!("Session {} running for up to {} seconds", session_id, duration.as_secs());

    let mut status = session.subscribe();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Session duration reached");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, ending session");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current.state == ConnectionState::Closed {
                    if let Some(e) = &current.error {
                        error!("Session ended: {}", e);
                    }
                    break;
                }
            }
        }
    }

    let transcript = session.disconnect().await;

    println!("{}", render_transcript(&transcript));

    let scorer = scorer(&cfg).await;
    let feedback = score_or_fallback(scorer.as_deref(), &config, &transcript).await;
    println!("{}", serde_json::to_string_pretty(&feedback)?);

    Ok(())
}
