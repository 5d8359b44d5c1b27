//! lesson-narrator-rs: classroom narration of lesson text, one sentence at a time.

mod api;
mod classroom;
mod config;
mod import;
mod lessons;
mod narration;
mod notifier;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::classroom::Classroom;
use crate::config::{Config, EngineKind};
use crate::import::{DocumentImporter, PdfConverter};
use crate::lessons::SampleLesson;
use crate::narration::kokoro::KokoroTtsEngine;
use crate::narration::{ConsoleEngine, NarrationDriver, SpeechEngine, SpeechRate};
use crate::notifier::Notifier;

#[derive(Parser, Debug)]
#[command(name = "lesson-narrator-rs", about = "Classroom lesson narrator")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control API until ctrl-c (default)
    Serve {
        /// Override the configured API port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Narrate a lesson once and exit
    Speak {
        /// Read the lesson from a text or PDF file
        #[arg(short, long, conflicts_with_all = ["sample", "text"])]
        file: Option<PathBuf>,

        /// Use a built-in sample lesson
        #[arg(short, long, conflicts_with = "text")]
        sample: Option<SampleLesson>,

        /// Lesson text given inline
        #[arg(short, long)]
        text: Option<String>,

        /// Speech rate (0.5 to 1.5)
        #[arg(short, long)]
        rate: Option<f32>,
    },
    /// List the voices of the configured engine
    Voices,
}

/// Load the configured engine, falling back to the console engine when the
/// Kokoro model cannot be loaded.
fn build_engine(config: &Config) -> Arc<dyn SpeechEngine> {
    let console = || -> Arc<dyn SpeechEngine> {
        Arc::new(ConsoleEngine::new(Duration::from_millis(
            config.speech.console_word_ms,
        )))
    };

    match config.speech.engine {
        EngineKind::Console => {
            info!("Using console narration engine");
            console()
        }
        EngineKind::Kokoro => {
            info!("Loading Kokoro TTS model...");
            let mut engine = KokoroTtsEngine::new(&config.speech);
            match engine.load_model_sync() {
                Ok(()) => {
                    info!("Kokoro TTS ready (voice: {})", config.speech.voice);
                    Arc::new(engine)
                }
                Err(e) => {
                    warn!("Failed to load TTS model: {e}");
                    info!("Falling back to console narration");
                    console()
                }
            }
        }
    }
}

fn build_classroom(config: &Config, engine: Arc<dyn SpeechEngine>) -> Classroom {
    let driver = NarrationDriver::new(engine, config.driver_settings());
    let importer = DocumentImporter::new(PdfConverter::from_config(&config.converter));
    let notifier = Notifier::new(config.feedback.notifications);
    Classroom::new(driver, importer, notifier, config.speech.rate)
}

async fn serve(classroom: Arc<Classroom>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    classroom.check_speech_availability();

    let mut failures = classroom.driver().failures();
    tokio::spawn(async move {
        loop {
            match failures.recv().await {
                Ok(f) => warn!(
                    "Session {} skipped sentence {} ({}): {}",
                    f.session,
                    f.index + 1,
                    f.unit,
                    f.error
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("{n} sentence failures not reported")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    api::start_api(
        api::ApiState {
            classroom: classroom.clone(),
        },
        port,
    )
    .await?;
    info!("{}", classroom.status());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    classroom.stop_teaching();
    Ok(())
}

async fn speak_once(
    classroom: Arc<Classroom>,
    file: Option<PathBuf>,
    sample: Option<SampleLesson>,
    text: Option<String>,
    rate: Option<f32>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(rate) = rate {
        classroom.set_rate(SpeechRate::new(rate));
    }
    if let Some(path) = file {
        classroom.import_document(&path).await?;
    } else if let Some(sample) = sample {
        classroom.load_sample(sample);
    } else if let Some(text) = text {
        classroom.set_lesson_text(text);
    }

    let mut status = classroom.driver().subscribe();
    classroom.start_teaching()?;

    loop {
        let current = status.borrow_and_update().clone();
        info!("{current}");
        if current.is_terminal() {
            break;
        }
        tokio::select! {
            changed = status.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping");
                classroom.stop_teaching();
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy ort/rodio internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info,rodio=info")
    } else {
        EnvFilter::new("info,ort=warn,rodio=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("lesson-narrator-rs starting");

    let config = Config::load(args.config.as_deref());
    info!(
        "Config loaded: engine {:?}, rate {}",
        config.speech.engine, config.speech.rate
    );

    let command = args.command.unwrap_or(Command::Serve { port: None });

    let engine = build_engine(&config);

    match command {
        Command::Voices => {
            for voice in engine.list_voices() {
                println!("{voice}");
            }
        }
        Command::Serve { port } => {
            let classroom = Arc::new(build_classroom(&config, engine));
            serve(classroom, port.unwrap_or(config.api.port)).await?;
        }
        Command::Speak {
            file,
            sample,
            text,
            rate,
        } => {
            let classroom = Arc::new(build_classroom(&config, engine));
            speak_once(classroom, file, sample, text, rate).await?;
        }
    }

    Ok(())
}
