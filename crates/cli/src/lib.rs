pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "ticketdesk",
    about = "Ticketdesk operator CLI",
    long_about = "Operate the ticketdesk bot: apply migrations, inspect configuration, check readiness and read archived transcripts.",
    after_help = "Examples:\n  ticketdesk doctor --json\n  ticketdesk config\n  ticketdesk transcript 7\n  ticketdesk transcript --limit 5"
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
    #[command(about = "Validate config, gateway token readiness, DB connectivity and transcript storage")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print a stored transcript, or list the most recent ones when no id is given")]
    Transcript {
        #[arg(help = "Ticket id, e.g. 7, 0007 or #0007")]
        id: Option<String>,
        #[arg(long, default_value_t = 20, help = "Number of transcripts to list")]
        limit: u32,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Transcript { id: Some(id), .. } => commands::transcript::show(&id),
        Command::Transcript { id: None, limit } => commands::transcript::list(limit),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
