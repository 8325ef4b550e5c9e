//! Bombe CLI: manage k-fold NMT training sessions, run their tasks and
//! monitor training logs.

mod commands;

use bombe_core::SessionError;
use bombe_lab::LabError;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Bombe: resumable k-fold training for neural machine translation
#[derive(Parser, Debug)]
#[command(name = "bombe", version, about, long_about = None)]
pub struct Cli {
    /// Workspace directory (holds bombe.toml)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Manage training sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Run corpus, training and scoring tasks for the current session
    Tasks {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Watch training logs and stream their metrics
    Monitor {
        /// Directories to search for job logs (default: session log dirs)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
        /// Run a single poll cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum SessionAction {
    /// Start a new session and make it current
    New {
        /// Language pair, e.g. en-cy (default from config)
        #[arg(short, long)]
        langs: Option<String>,
        /// Free-text note stored with the session
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// List sessions, newest first
    List {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
        /// List every session
        #[arg(short, long)]
        all: bool,
    },
    /// Make a session current, creating it with that id if needed
    Use {
        id: String,
        /// Create a fresh session with this id even if one exists
        #[arg(short, long)]
        force: bool,
    },
    /// Print the current session id
    Get,
    /// Stop using the current session
    End,
    /// Replace the current session's comment
    Annotate { comment: String },
    /// Show a session's settings and progress
    View {
        /// Session id (default: current)
        id: Option<String>,
    },
    /// Delete a session from the registry
    Rm { id: String },
    /// Training duration of a fold in hours (-1 when unknown)
    Duration { fold: u32 },
    /// Print recorded fold results as JSON
    Results {
        /// Drop per-file sizes, keeping directory totals
        #[arg(short, long)]
        summarize: bool,
    },
    /// Print the scores of every recorded fold
    Scores,
    /// Print a session directory, optionally for one fold
    Dir {
        /// config, logs, models, results, spelling, work or export
        kind: bombe_core::DirKind,
        #[arg(long)]
        fold: Option<u32>,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum TaskAction {
    /// Clean every raw bitext file into the export directory
    ExportAndClean,
    /// Split the cleaned corpus into test set and folds
    SplitCorpus {
        #[arg(short)]
        k: Option<u32>,
        #[arg(long)]
        test_fraction: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Train every remaining fold
    Train,
    /// Score one fold against the test set
    Score {
        fold: u32,
        /// Record the result if the fold has none yet
        #[arg(long)]
        save: bool,
    },
    /// Copy the best fold's model out for serving
    PublishModel {
        name: String,
        config_models_dir: PathBuf,
        dest_root: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default bombe.toml into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

/// The session lookup failure behind `err`, if that is what it is.
fn absent_session(err: &anyhow::Error) -> Option<&SessionError> {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<SessionError>()
                .or_else(|| cause.downcast_ref::<LabError>().and_then(LabError::as_session))
        })
        .filter(|e| e.is_absent())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("org", "bombe", "bombe")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "bombe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match commands::handle_command(cli.command, &workspace).await {
        Ok(()) => Ok(()),
        Err(err) => match absent_session(&err) {
            Some(SessionError::NoActiveSession) => {
                eprintln!("No training session is active.");
                eprintln!("Use: bombe session use <id>");
                std::process::exit(1);
            }
            Some(absent) => {
                eprintln!("{absent}");
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}
