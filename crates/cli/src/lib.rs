pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "mockops",
    about = "Mockops operator CLI",
    long_about = "Operate the mock ticket tracker: migrations, readiness checks, config inspection and ticket lookups.",
    after_help = "Examples:\n  mockops doctor --json\n  mockops tickets list --status open\n  mockops tickets show MOCK-OPS-123456"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack token readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand, about = "Read tickets straight from the database")]
    Tickets(TicketsCommand),
}

#[derive(Debug, Subcommand)]
enum TicketsCommand {
    #[command(about = "List tickets, newest first")]
    List {
        #[arg(long, help = "Filter by status: open, in_review or closed")]
        status: Option<String>,
        #[arg(long, default_value_t = 20, help = "Maximum number of tickets to return")]
        limit: usize,
    },
    #[command(about = "Show one ticket with its comments")]
    Show {
        #[arg(help = "Ticket key, e.g. MOCK-OPS-123456")]
        key: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Tickets(TicketsCommand::List { status, limit }) => {
            commands::tickets::list(status.as_deref(), limit)
        }
        Command::Tickets(TicketsCommand::Show { key }) => commands::tickets::show(&key),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
