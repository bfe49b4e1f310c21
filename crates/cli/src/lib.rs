pub mod commands;

use clap::{Parser, Subcommand};
use havitush_core::config::{AppConfig, LoadOptions, LogFormat};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "havitush",
    about = "Havitush operator CLI",
    long_about = "Inspect configuration, prepare the conversation store, check the ruleset, and run single chat turns locally.",
    after_help = "Examples:\n  havitush doctor --json\n  havitush seed\n  havitush chat --phone 972501234567 שלום"
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
    #[command(about = "Validate config, DB connectivity, and the configured ruleset")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Store the built-in ruleset under the configured id if none is stored")]
    Seed,
    #[command(about = "Resolve the configured ruleset and report validation issues")]
    Ruleset {
        #[arg(long, help = "Print the resolved ruleset as a JSON document")]
        dump: bool,
    },
    #[command(about = "Send one text message as the given phone number and print the reply")]
    Chat {
        #[arg(long, help = "Sender phone number; punctuation and a leading + are ignored")]
        phone: String,
        #[arg(required = true, num_args = 1.., help = "Message text")]
        message: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Config => commands::CommandResult::raw(commands::config::run()),
        Command::Doctor { json } => commands::CommandResult::raw(commands::doctor::run(json)),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Ruleset { dump } => commands::ruleset::run(dump),
        Command::Chat { phone, message } => commands::chat::run(&phone, &message.join(" ")),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single parseable outcome.
fn init_logging() {
    use tracing::Level;

    let (level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => (config.logging.level, config.logging.format),
        Err(_) => ("warn".to_string(), LogFormat::Compact),
    };
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(log_level);
    // A subscriber may already be installed when embedded in tests.
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
