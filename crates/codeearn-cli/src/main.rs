use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "codeearn-cli", version, about = "CodeEarn CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Time balance
    Balance {
        #[command(subcommand)]
        action: commands::balance::BalanceAction,
    },
    /// Restricted app management
    Apps {
        #[command(subcommand)]
        action: commands::apps::AppsAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Earn time from accepted submissions
    Earn {
        #[command(subcommand)]
        action: commands::earn::EarnAction,
    },
    /// Run the lock engine, reading foreground signals from stdin
    Daemon(commands::daemon::DaemonArgs),
    /// Last lock state recorded by the daemon
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CODEEARN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Balance { action } => commands::balance::run(action),
        Commands::Apps { action } => commands::apps::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Earn { action } => commands::earn::run(action),
        Commands::Daemon(args) => commands::daemon::run(args),
        Commands::Status => commands::status::run(),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
