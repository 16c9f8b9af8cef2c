//! CLI binary for parley.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use parley::classifier::Category;
use parley::transcript::{EngineEvent, EngineOptions, EventSink, RecognitionResult};
use parley::{
    AssistantBackend, ChatMessage, ClassifyingBackend, DispatchOutcome, GeminiModel,
    HistoryStore, HttpAssistantBackend, HttpHistoryStore, MessageStatus, ParleyConfig,
    ProcessSpeech, SessionState, SessionUpdate, SqliteHistoryStore, TranscriptEvent,
    TranscriptionEngine, UserProfile, VoiceInterface,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parley: talk to a named assistant.
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use the language model and a local SQLite history instead of the server.
    #[arg(long)]
    local: bool,

    /// Bearer token for the assistant server.
    #[arg(long, env = "PARLEY_TOKEN")]
    token: Option<String>,

    /// Your name, as the assistant should address you.
    #[arg(long, default_value = "User")]
    user: String,

    /// Assistant name; also the wake word.
    #[arg(long)]
    assistant: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Listen for wake-word commands; each stdin line is one final transcript.
    Listen,

    /// Send one typed message and print the reply.
    Ask {
        /// Message text.
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Show recent chat history, newest first.
    History {
        /// Number of exchanges to show.
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Delete the chat history.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ParleyConfig::from_file(path)?,
        None => {
            let default_path = ParleyConfig::default_config_path();
            if default_path.exists() {
                ParleyConfig::from_file(&default_path)?
            } else {
                ParleyConfig::default()
            }
        }
    };

    let (backend, store, token) = build_stack(&cli, &config)?;
    let profile = UserProfile {
        name: cli.user.clone(),
        assistant_name: cli
            .assistant
            .clone()
            .unwrap_or_else(|| config.voice.default_wake_word.clone()),
        token: Some(token),
    };

    match cli.command.unwrap_or(Command::Listen) {
        Command::Listen => run_listen(config, backend, store, profile).await,
        Command::Ask { text } => run_ask(config, backend, store, profile, &text.join(" ")).await,
        Command::History { limit } => run_history(config, backend, store, profile, limit).await,
        Command::Clear => run_clear(config, backend, store, profile).await,
    }
}

type Stack = (Arc<dyn AssistantBackend>, Arc<dyn HistoryStore>, String);

fn build_stack(cli: &Cli, config: &ParleyConfig) -> anyhow::Result<Stack> {
    if cli.local {
        let model = GeminiModel::from_env(&config.backend)?;
        let store = SqliteHistoryStore::open(&config.history.resolved_db_path())?;
        let token = cli.token.clone().unwrap_or_else(|| "local".to_owned());
        Ok((
            Arc::new(ClassifyingBackend::new(Arc::new(model))),
            Arc::new(store),
            token,
        ))
    } else {
        let token = cli
            .token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("--token (or PARLEY_TOKEN) is required without --local"))?;
        Ok((
            Arc::new(HttpAssistantBackend::new(&config.backend)?),
            Arc::new(HttpHistoryStore::new(&config.backend)?),
            token,
        ))
    }
}

async fn run_listen(
    mut config: ParleyConfig,
    backend: Arc<dyn AssistantBackend>,
    store: Arc<dyn HistoryStore>,
    profile: UserProfile,
) -> anyhow::Result<()> {
    println!("Parley v{}", env!("CARGO_PKG_VERSION"));
    config.voice.enabled = true;

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let mut voice = VoiceInterface::new(
        config.clone(),
        Arc::new(StdinEngine::new()),
        backend,
        store,
    )
    .with_updates(updates_tx);
    if config.synthesis.enabled {
        voice = voice.with_speech(Arc::new(ProcessSpeech::new(config.synthesis.clone())));
    }

    let loaded = voice.sign_in(profile).await;
    info!("{} earlier exchanges loaded", loaded.len());
    let wake_word = voice.wake_word().unwrap_or_default();
    if voice.session_state().is_none() {
        anyhow::bail!("voice commands are unavailable");
    }
    println!("\nListening for \"{wake_word}\". Type what you say; Ctrl+D or Ctrl+C to quit.\n");

    let mut input_closed = false;
    let mut processing = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            update = updates_rx.recv() => {
                let Some(update) = update else { break };
                match update {
                    SessionUpdate::State(state) => {
                        processing = state == SessionState::Processing;
                        if state == SessionState::Stopped {
                            break;
                        }
                    }
                    SessionUpdate::Transcript(TranscriptEvent::Error(kind)) => {
                        if kind == parley::transcript::CaptureErrorKind::Aborted {
                            input_closed = true;
                        } else {
                            eprintln!("(capture error: {})", kind.code());
                        }
                    }
                    SessionUpdate::Transcript(_) => {}
                    SessionUpdate::Dispatched(outcome) => {
                        print_outcome(&outcome);
                        processing = false;
                    }
                }
                if input_closed && !processing {
                    break;
                }
            }
        }
    }

    voice.logout().await;
    Ok(())
}

async fn run_ask(
    config: ParleyConfig,
    backend: Arc<dyn AssistantBackend>,
    store: Arc<dyn HistoryStore>,
    profile: UserProfile,
    text: &str,
) -> anyhow::Result<()> {
    let mut voice = text_only(config, backend, store);
    voice.sign_in(profile).await;
    let outcome = voice.send_text(text).await;
    print_outcome(&outcome);
    match outcome {
        DispatchOutcome::Finished(message) if message.status == MessageStatus::Errored => {
            anyhow::bail!("the assistant could not answer")
        }
        DispatchOutcome::Dropped(reason) => anyhow::bail!("message not sent: {reason:?}"),
        DispatchOutcome::Finished(_) => Ok(()),
    }
}

async fn run_history(
    mut config: ParleyConfig,
    backend: Arc<dyn AssistantBackend>,
    store: Arc<dyn HistoryStore>,
    profile: UserProfile,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(limit) = limit {
        config.history.load_limit = limit.max(1);
    }
    let mut voice = text_only(config, backend, store);
    let history = voice.sign_in(profile).await;
    if history.is_empty() {
        println!("No chat history.");
    }
    for message in &history {
        print_message(message);
    }
    Ok(())
}

async fn run_clear(
    config: ParleyConfig,
    backend: Arc<dyn AssistantBackend>,
    store: Arc<dyn HistoryStore>,
    profile: UserProfile,
) -> anyhow::Result<()> {
    let mut voice = text_only(config, backend, store);
    voice.sign_in(profile).await;
    let outcome = voice.clear_history().await;
    if outcome.success {
        println!("Chat history cleared.");
        Ok(())
    } else {
        anyhow::bail!(
            "history cleared locally, but the store failed: {}",
            outcome.error.unwrap_or_default()
        )
    }
}

fn text_only(
    mut config: ParleyConfig,
    backend: Arc<dyn AssistantBackend>,
    store: Arc<dyn HistoryStore>,
) -> VoiceInterface {
    config.voice.enabled = false;
    VoiceInterface::new(config, Arc::new(StdinEngine::new()), backend, store)
}

fn print_outcome(outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Finished(message) => print_message(message),
        DispatchOutcome::Dropped(reason) => eprintln!("(dropped: {reason:?})"),
    }
}

fn print_message(message: &ChatMessage) {
    println!("you> {}", message.user_message);
    let tag = match (&message.classification, message.response_type) {
        (Some(result), _) => match result.action() {
            Some(action) => format!("{} → {action}", result.category()),
            None => result.category().to_string(),
        },
        (None, Category::General) => String::new(),
        (None, category) => category.to_string(),
    };
    if tag.is_empty() {
        println!("assistant> {}\n", message.ai_response);
    } else {
        println!("assistant [{tag}]> {}\n", message.ai_response);
    }
}

/// Transcription stand-in: every non-empty stdin line is one final result.
///
/// End of input is reported as an `aborted` error so the session does not
/// restart.
struct StdinEngine {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
    reader: std::sync::Mutex<Option<(JoinHandle<()>, EventSink)>>,
}

impl StdinEngine {
    fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
            reader: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl TranscriptionEngine for StdinEngine {
    async fn start(&self, _options: &EngineOptions, sink: EventSink) -> parley::Result<()> {
        let lines = Arc::clone(&self.lines);
        let task_sink = sink.clone();
        let task = tokio::spawn(async move {
            task_sink.emit(EngineEvent::Start);
            loop {
                let next = lines.lock().await.next_line().await;
                match next {
                    Ok(Some(line)) => {
                        let event = EngineEvent::Results {
                            result_index: 0,
                            results: vec![RecognitionResult::final_text(line)],
                        };
                        if !task_sink.emit(event) {
                            break;
                        }
                    }
                    Ok(None) => {
                        task_sink.emit(EngineEvent::Error {
                            code: "aborted".into(),
                        });
                        task_sink.emit(EngineEvent::End);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("stdin read failed: {e}");
                        task_sink.emit(EngineEvent::Error {
                            code: "audio-capture".into(),
                        });
                        task_sink.emit(EngineEvent::End);
                        break;
                    }
                }
            }
        });

        let previous = self
            .reader
            .lock()
            .map_err(|e| parley::ParleyError::Capture(format!("lock poisoned: {e}")))?
            .replace((task, sink));
        if let Some((task, _)) = previous {
            task.abort();
        }
        Ok(())
    }

    async fn stop(&self) -> parley::Result<()> {
        let current = self
            .reader
            .lock()
            .map_err(|e| parley::ParleyError::Capture(format!("lock poisoned: {e}")))?
            .take();
        if let Some((task, sink)) = current {
            task.abort();
            sink.emit(EngineEvent::End);
        }
        Ok(())
    }
}
