pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "knowbot",
    about = "Knowbot operator CLI",
    long_about = "Inspect knowbot configuration, check runtime readiness, and ask one-off questions against the knowledge bases.",
    after_help = "Examples:\n  knowbot doctor --json\n  knowbot config\n  knowbot ask \"how do I rotate my api key?\" --kb KB-ENG"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack token readiness, and backend configuration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Answer one question through the query orchestrator and print JSON")]
    Ask {
        question: String,
        #[arg(long = "kb", value_name = "ID", help = "Knowledge base to search, in priority order (repeatable)")]
        knowledge_bases: Vec<String>,
        #[arg(long, help = "Skip the agent and ask the model directly")]
        direct: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Ask { question, knowledge_bases, direct } => {
            commands::ask::run(commands::ask::AskRequest { question, knowledge_bases, direct })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
