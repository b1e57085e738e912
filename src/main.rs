//! Application entry point: voice agent CLI.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (defaults on first run), then apply
//!    `VA_*` environment overrides.
//! 3. Build the [`VoiceAgentApp`] (providers, tools, agents, dialog).
//! 4. Run the selected subcommand:
//!    * `chat`: typed turns on stdin, replies on stdout.
//!    * `listen`: raw 16-bit mono PCM (file, stdin or microphone) through
//!      the full voice loop.
//!    * `config`: write or print `settings.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use voice_agent::{
    app::VoiceAgentApp,
    audio::{AudioFrontend, AudioSink, FileSink, NullSink},
    config::{AppConfig, AppPaths},
    dialog::DialogTurn,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "voice-agent", version, about = "Real-time spoken dialogue agent")]
struct Cli {
    /// Settings file to use instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Type turns instead of speaking them.
    Chat,

    /// Run the voice loop over raw s16le mono PCM.
    Listen {
        /// Input file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        input: String,

        /// Write spoken replies (raw PCM) here instead of discarding them.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Capture from the default microphone and play on the speaker.
        #[arg(long)]
        mic: bool,
    },

    /// Inspect or create the settings file.
    Config {
        /// Write the default settings file if none exists.
        #[arg(long)]
        init: bool,

        /// Print the effective configuration as TOML.
        #[arg(long)]
        show: bool,
    },
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_turn(prefix: &str, turn: &DialogTurn) {
    println!("{prefix}: {}", turn.response_text);
    for result in &turn.tool_results {
        let status = if result.timed_out {
            "timeout".to_string()
        } else {
            result.returncode.to_string()
        };
        println!("Tool {} ({}) → {status}", result.task_id, result.command);
        if !result.stdout.trim().is_empty() {
            println!("  stdout: {}", result.stdout.trim_end());
        }
        if !result.stderr.trim().is_empty() {
            println!("  stderr: {}", result.stderr.trim_end());
        }
    }
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

async fn run_chat(app: &VoiceAgentApp) -> Result<()> {
    println!("Type a message (Ctrl-D to quit).");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }

        print_turn("Agent", &app.handle_text(text).await);
        for turn in app.poll_background().await {
            print_turn("Agent (background)", &turn);
        }
    }

    let cancelled = app.agents().cancel_all().await + app.tools().cancel_all();
    if cancelled > 0 {
        log::info!("main: cancelled {cancelled} outstanding task(s)");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// listen
// ---------------------------------------------------------------------------

/// Read `reader` into `frame_bytes` frames; a short tail is sent as-is.
async fn feed_raw<R>(mut reader: R, frontend: &AudioFrontend, frame_bytes: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut frames = 0;
    loop {
        let mut frame = vec![0u8; frame_bytes];
        let mut filled = 0;
        while filled < frame_bytes {
            let n = reader.read(&mut frame[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(frames);
        }
        frame.truncate(filled);
        frontend.enqueue_frame(Some(frame));
        frames += 1;
        if filled < frame_bytes {
            return Ok(frames);
        }
    }
}

fn output_sink(output: Option<&Path>) -> Result<Arc<dyn AudioSink>> {
    match output {
        Some(path) => {
            let sink = FileSink::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(NullSink)),
    }
}

/// Print every turn the loop reports until it is dropped.
fn spawn_turn_printer(mut rx: mpsc::UnboundedReceiver<DialogTurn>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(turn) = rx.recv().await {
            println!("You: {}", turn.user_text);
            print_turn("Agent", &turn);
        }
    })
}

async fn run_listen_file(app: &VoiceAgentApp, input: &str, output: Option<&Path>) -> Result<()> {
    let sink = output_sink(output)?;
    let (tx, rx) = mpsc::unbounded_channel();
    let voice = app.voice_loop(sink).with_turn_channel(tx);
    let printer = spawn_turn_printer(rx);

    let frontend = Arc::new(AudioFrontend::new());
    frontend.start();

    let frame_bytes = app.config().audio.frame_bytes();
    let feeder = {
        let frontend = Arc::clone(&frontend);
        let input = input.to_string();
        tokio::spawn(async move {
            let fed = if input == "-" {
                feed_raw(tokio::io::stdin(), &frontend, frame_bytes).await
            } else {
                match tokio::fs::File::open(&input).await {
                    Ok(file) => feed_raw(file, &frontend, frame_bytes).await,
                    Err(e) => Err(anyhow::Error::new(e).context(format!("opening {input}"))),
                }
            };
            frontend.stop();
            fed
        })
    };

    voice.run(&frontend).await;
    drop(voice);

    let frames = feeder.await.context("input task panicked")??;
    log::info!("main: fed {frames} frame(s)");
    let _ = printer.await;
    Ok(())
}

#[cfg(feature = "device")]
async fn run_listen_mic(app: &VoiceAgentApp, output: Option<&Path>) -> Result<()> {
    use voice_agent::audio::{MicCapture, SpeakerSink};

    let sink: Arc<dyn AudioSink> = match output {
        Some(path) => output_sink(Some(path))?,
        None => Arc::new(
            SpeakerSink::open(app.config().playback.sample_rate)
                .context("opening the speaker")?,
        ),
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let voice = app.voice_loop(sink).with_turn_channel(tx);
    let printer = spawn_turn_printer(rx);

    let frontend = Arc::new(AudioFrontend::new());
    frontend.start();

    let audio = &app.config().audio;
    let capture =
        MicCapture::new(audio.sample_rate, audio.chunk_ms).context("opening the microphone")?;
    let _stream = capture
        .start(Arc::clone(&frontend))
        .context("starting microphone capture")?;

    {
        let frontend = Arc::clone(&frontend);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("main: interrupt received, stopping");
                frontend.stop();
            }
        });
    }

    println!("Listening (Ctrl-C to stop).");
    voice.run(&frontend).await;
    drop(voice);
    let _ = printer.await;
    Ok(())
}

#[cfg(not(feature = "device"))]
async fn run_listen_mic(_app: &VoiceAgentApp, _output: Option<&Path>) -> Result<()> {
    anyhow::bail!("microphone capture needs the `device` feature (cargo build --features device)")
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn run_config(config: &AppConfig, path: &Path, init: bool, show: bool) -> Result<()> {
    if init {
        if path.exists() {
            println!("{} already exists", path.display());
        } else {
            AppConfig::default().save_to(path)?;
            println!("wrote {}", path.display());
        }
    }
    if show || !init {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // 2. Configuration
    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppPaths::new().settings_file);
    let mut config = AppConfig::load_from(&settings_path).unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e:#}); using defaults");
        AppConfig::default()
    });
    config.apply_env_overrides();

    if let Command::Config { init, show } = cli.command {
        return run_config(&config, &settings_path, init, show);
    }

    // 3. Application
    log::info!("voice agent starting up");
    let app = VoiceAgentApp::new(config);

    // 4. Subcommand
    match cli.command {
        Command::Chat => run_chat(&app).await,
        Command::Listen { mic: true, output, .. } => run_listen_mic(&app, output.as_deref()).await,
        Command::Listen { input, output, .. } => {
            run_listen_file(&app, &input, output.as_deref()).await
        }
        Command::Config { .. } => Ok(()),
    }
}
