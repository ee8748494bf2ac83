//! # termcast
//!
//! Records commands running in a pseudo-terminal as asciicast v2 event logs.
//!
//! ## Overview
//!
//! - `termcast record -- <command>` runs the command in a PTY, mirrors its
//!   output, and records it under the configured persistence policy
//! - `termcast info <file>` summarizes an existing recording
//!
//! ## Architecture
//!
//! This is Layer 2 - the binary that ties together:
//! - termcast-core: Core types and configuration
//! - termcast-recorder: Recording engine and PTY sessions

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use termcast_core::{Dimensions, RecorderConfig, RecordingMode, RecordingOptions};
use termcast_recorder::{
    drive_recordings, CastEnv, CastFile, PtyOptions, PtyTerminal, RecordingManager,
    TerminalEvent, TerminalSession,
};

#[derive(Debug, Parser)]
#[command(name = "termcast", version, about = "Record terminal sessions as asciicast v2")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "TERMCAST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a command in a PTY and record it
    Record(RecordArgs),
    /// Print a summary of a recording
    Info {
        /// Path to a .cast file
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
struct RecordArgs {
    /// Persistence policy: always | on-failure
    #[arg(long)]
    mode: Option<RecordingMode>,

    /// Directory for recordings
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Cap on idle gaps in seconds (0 = no capping)
    #[arg(long)]
    idle_time_limit: Option<f64>,

    /// Stop recording after this many seconds (0 = unbounded)
    #[arg(long)]
    max_duration: Option<u64>,

    /// Stop recording after this many seconds without output (0 = disabled)
    #[arg(long)]
    inactivity_timeout: Option<u64>,

    /// Terminal rows (default from config)
    #[arg(long)]
    rows: Option<u16>,

    /// Terminal columns (default from config)
    #[arg(long)]
    cols: Option<u16>,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

impl RecordArgs {
    fn overrides(&self) -> RecordingOptions {
        RecordingOptions {
            format: None,
            mode: self.mode,
            output_dir: self.output_dir.clone(),
            idle_time_limit: self.idle_time_limit,
            max_duration: self.max_duration,
            inactivity_timeout: self.inactivity_timeout,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RecorderConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RecorderConfig::default(),
    };

    // Logs go to stderr; stdout carries the recorded session.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    match cli.command {
        Command::Record(args) => {
            let code = record(config, args).await?;
            std::process::exit(code);
        }
        Command::Info { file } => info(file),
    }
}

async fn record(config: RecorderConfig, args: RecordArgs) -> anyhow::Result<i32> {
    let dimensions = Dimensions::new(
        args.rows.unwrap_or(config.terminal.default_rows),
        args.cols.unwrap_or(config.terminal.default_cols),
    );
    let (command, command_args) = args
        .command
        .split_first()
        .context("No command given")?;

    let manager = Arc::new(RecordingManager::new(config.recording.clone()));
    let pty = Arc::new(PtyTerminal::spawn(PtyOptions {
        command: command.clone(),
        args: command_args.to_vec(),
        dimensions,
        term: config.terminal.term.clone(),
        cwd: None,
    })?);
    let mut pty_events = pty.take_events().context("PTY event stream already taken")?;

    let recording = manager.create_recording(&args.overrides())?;
    recording.start(
        dimensions,
        Some(CastEnv {
            shell: std::env::var("SHELL").ok(),
            term: Some(config.terminal.term.clone()),
        }),
    )?;
    tracing::info!(
        "Recording '{}' to {}",
        args.command.join(" "),
        recording.final_path().display()
    );

    if let Some(mut auto_stops) = manager.take_auto_stop_receiver() {
        tokio::spawn(async move {
            while let Some(event) = auto_stops.recv().await {
                tracing::warn!(
                    recording_id = %event.metadata.id,
                    "Recording stopped early ({}); the command keeps running",
                    event.metadata.stop_reason
                );
                print_metadata(&event.metadata);
            }
        });
    }

    // Forward stdin to the child.
    {
        let pty = Arc::clone(&pty);
        std::thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let mut stdin = std::io::stdin().lock();
            loop {
                match std::io::Read::read(&mut stdin, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if pty.write(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // Mirror output to stdout while the registry records it.
    let (tx, rx) = mpsc::unbounded_channel();
    let mirror = tokio::spawn(async move {
        let mut exit_code = None;
        let mut stdout = std::io::stdout();
        while let Some(event) = pty_events.recv().await {
            match &event {
                TerminalEvent::Output(text) => {
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
                TerminalEvent::Exit(code) => exit_code = *code,
                TerminalEvent::Resize(_) => {}
            }
            let done = matches!(event, TerminalEvent::Exit(_));
            if tx.send(event).is_err() || done {
                break;
            }
        }
        exit_code
    });

    let finalized = drive_recordings(rx, &manager).await;
    let exit_code = mirror.await.context("Output mirror task failed")?;
    pty.dispose();

    for metadata in &finalized {
        print_metadata(metadata);
    }
    Ok(exit_code.unwrap_or(1))
}

fn print_metadata(metadata: &termcast_core::RecordingMetadata) {
    match serde_json::to_string_pretty(metadata) {
        Ok(json) => eprintln!("{json}"),
        Err(e) => tracing::error!("Failed to serialize recording metadata: {}", e),
    }
}

fn info(file: PathBuf) -> anyhow::Result<()> {
    let cast = CastFile::load(&file)
        .with_context(|| format!("Failed to read recording {}", file.display()))?;

    println!("file:      {}", file.display());
    println!("version:   {}", cast.header.version);
    println!("size:      {}x{}", cast.header.width, cast.header.height);
    println!("timestamp: {}", cast.header.timestamp);
    if let Some(env) = &cast.header.env {
        if let Some(shell) = &env.shell {
            println!("shell:     {shell}");
        }
        if let Some(term) = &env.term {
            println!("term:      {term}");
        }
    }
    println!("events:    {}", cast.event_count());
    println!("duration:  {:.3}s", cast.duration());
    Ok(())
}
