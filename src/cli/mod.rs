pub mod daemon_path;
pub mod history;
pub mod process;
pub mod sessions;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use history::{process_history_command, HistoryCommand};
use process::{kill_previous_servers, restart_server, server_paths};
use sessions::{process_sessions_command, SessionsCommand};
use status::process_status_command;
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::start_daemon,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "dwellwatch", version, long_about = None)]
#[command(about = "Tracks where your time goes and reports on it", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts a daemon for the application, replacing a running one")]
    Init {},
    #[command(
        about = "Run a daemon directly in current console. Used for debugging"
    )]
    Serve {},
    #[command(about = "Stop currently running daemon.")]
    Stop {},
    #[command(about = "Today's totals by category and when the next report goes out")]
    Status {},
    #[command(about = "Rebuild login sessions of a day or of an exported marker file")]
    Sessions {
        #[command(flatten)]
        command: SessionsCommand,
    },
    #[command(about = "Daily summaries out of the dated records")]
    History {
        #[command(flatten)]
        command: HistoryCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &app_dir.join("logs"), logging_level, args.log)?;

    match args.commands {
        Commands::Init {} => restart_server(&app_dir),
        Commands::Stop {} => {
            let stopped = kill_previous_servers(&server_paths()?)?;
            println!("Stopped {stopped} daemon(s)");
            Ok(())
        }
        Commands::Serve {} => start_daemon(app_dir).await,
        Commands::Status {} => process_status_command(&app_dir).await,
        Commands::Sessions { command } => process_sessions_command(&app_dir, command).await,
        Commands::History { command } => process_history_command(&app_dir, command).await,
    }
}
