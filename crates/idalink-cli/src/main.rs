//! idalink - open `idb://` links in running or freshly launched IDA instances.
//!
//! Thin front end over `idalink-core`: loads the settings file, resolves the
//! search roots and IDA executable, and hands them to the core. Progress and
//! logs go to stderr; command results go to stdout.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use idalink_core::{CancellationToken, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Environment variable overriding the settings file location.
const CONFIG_ENV: &str = "IDALINK_CONFIG";

/// Exit status after Ctrl+C, as shells report for SIGINT.
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "idalink")]
#[command(version, about = "Open idb:// links in IDA")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send an idb:// link to the IDA instance that has its database open
    OpenLink {
        /// Link such as idb://sample.i64/functions?ea=0x401000
        uri: String,

        /// Fail instead of launching IDA when no instance matches
        #[arg(long)]
        no_launch: bool,

        /// Overall startup timeout in seconds when launching
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Do not wait for auto-analysis after launching
        #[arg(long)]
        skip_analysis: bool,
    },

    /// List running IDA instances and the databases they have open
    ListInstances {
        /// Print the instances as JSON
        #[arg(long)]
        json: bool,
    },

    /// Launch IDA on a database and wait until it is ready
    Launch {
        /// Path to the .idb/.i64 file
        idb: PathBuf,

        /// Overall startup timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Do not wait for auto-analysis
        #[arg(long)]
        skip_analysis: bool,
    },

    /// Manage the directories searched for databases
    #[command(subcommand)]
    SearchPath(SearchPathCommand),

    /// Manage known IDA installations
    #[command(subcommand)]
    Install(InstallCommand),
}

#[derive(Subcommand, Debug)]
enum SearchPathCommand {
    /// Add a directory to search for databases
    Add { path: PathBuf },
    /// Show the configured search directories
    List,
    /// Remove a search directory
    Remove { path: PathBuf },
}

#[derive(Subcommand, Debug)]
enum InstallCommand {
    /// Register an IDA installation directory
    Add {
        name: String,
        dir: PathBuf,

        /// Use this installation for launching
        #[arg(long)]
        default: bool,
    },
    /// Show registered installations
    List,
    /// Forget an installation
    Remove { name: String },
    /// Use a registered installation for launching
    Default { name: String },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

fn run(args: Args) -> Result<()> {
    let config_path = match args.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    debug!(
        "idalink {} on {}, settings at {}",
        env!("CARGO_PKG_VERSION"),
        idalink_core::platform::current_platform(),
        config_path.display()
    );

    let mut stdout = std::io::stdout().lock();
    match args.command {
        Command::OpenLink {
            uri,
            no_launch,
            timeout,
            skip_analysis,
        } => {
            let settings = Settings::load(&config_path)?;
            let cancel = interrupt_token()?;
            commands::open_link(
                &settings,
                &uri,
                !no_launch,
                commands::LaunchFlags {
                    timeout_secs: timeout,
                    skip_analysis,
                },
                &cancel,
                &mut stdout,
            )
        }
        Command::ListInstances { json } => commands::list_instances(json, &mut stdout),
        Command::Launch {
            idb,
            timeout,
            skip_analysis,
        } => {
            let settings = Settings::load(&config_path)?;
            let cancel = interrupt_token()?;
            commands::launch(
                &settings,
                &idb,
                commands::LaunchFlags {
                    timeout_secs: timeout,
                    skip_analysis,
                },
                &cancel,
                &mut stdout,
            )
        }
        Command::SearchPath(command) => {
            let action = match command {
                SearchPathCommand::Add { path } => commands::SearchPathAction::Add(path),
                SearchPathCommand::List => commands::SearchPathAction::List,
                SearchPathCommand::Remove { path } => commands::SearchPathAction::Remove(path),
            };
            commands::search_path(&config_path, action, &mut stdout)
        }
        Command::Install(command) => {
            let action = match command {
                InstallCommand::Add { name, dir, default } => {
                    commands::InstallAction::Add { name, dir, default }
                }
                InstallCommand::List => commands::InstallAction::List,
                InstallCommand::Remove { name } => commands::InstallAction::Remove(name),
                InstallCommand::Default { name } => commands::InstallAction::Default(name),
            };
            commands::install(&config_path, action, &mut stdout)
        }
    }
}

/// Token tripped by Ctrl+C during the analysis wait, which skips the wait.
///
/// Anywhere else, or on a second Ctrl+C, the process exits at once.
fn interrupt_token() -> Result<CancellationToken> {
    let token = CancellationToken::disarmed();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() || !handler_token.cancel() {
            std::process::exit(i32::from(INTERRUPTED_EXIT));
        }
        eprintln!("Interrupted, skipping analysis wait (press Ctrl+C again to exit)");
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(token)
}
