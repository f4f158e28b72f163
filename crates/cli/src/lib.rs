pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "vaxel",
    about = "Växel operator CLI",
    long_about = "Operate växel runtime readiness, migrations, offline route checks, and cache maintenance.",
    after_help = "Examples:\n  vaxel doctor --json\n  vaxel route \"vad blir vädret imorgon\"\n  vaxel cache-clear"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, database connectivity, and tool catalog readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Classify a query offline through the deterministic rule tier")]
    Route {
        #[arg(help = "The query text to classify")]
        query: String,
        #[arg(long, help = "Use the knowledge taxonomy instead of the action taxonomy")]
        knowledge: bool,
    },
    #[command(about = "Delete all persisted agent combo cache entries")]
    CacheClear,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Route { query, knowledge } => commands::route::run(&query, knowledge),
        Command::CacheClear => commands::cache_clear::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
