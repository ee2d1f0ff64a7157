//! Sunlight command-line interface
//!
//! Wraps the downsampling engine for schedulers and operators:
//! - `run` processes the next window (exit 75 asks the scheduler to retry)
//! - `plan`, `show` and `config` inspect state without writing
//! - `ingest` and `generate` feed raw readings for local testing

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sunlight_logging::{init_logging, LogConfig};

mod cli;

use cli::context::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "sunlight",
    version,
    about = "Per-minute downsampling and gap fill for light sensor readings"
)]
struct Cli {
    /// Config file (default: $SUNLIGHT_HOME/config.toml)
    #[arg(long, global = true, env = "SUNLIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// DuckDB warehouse file, overriding the config
    #[arg(long, global = true, env = "SUNLIGHT_WAREHOUSE")]
    warehouse: Option<PathBuf>,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Downsample the next window of raw readings
    Run(cli::run::RunArgs),

    /// Show the window the next run would process
    Plan(cli::plan::PlanArgs),

    /// Append raw readings from a JSON or JSON Lines file
    Ingest(cli::ingest::IngestArgs),

    /// Write a day of synthetic readings as JSON Lines
    Generate(cli::generate::GenerateArgs),

    /// Show the newest downsampled rows
    Show(cli::show::ShowArgs),

    /// Show resolved configuration and paths
    Config(cli::config::ConfigArgs),
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Run(args) => args.json,
        Commands::Plan(args) => args.json,
        Commands::Ingest(args) => args.json,
        Commands::Show(args) => args.json,
        Commands::Config(args) => args.json,
        Commands::Generate(_) => false,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    let settings = match Settings::resolve(cli.config.clone(), cli.warehouse.clone()) {
        Ok(settings) => settings,
        Err(err) => return report_failure(&err, json_mode),
    };

    let log_dir = settings.log_dir();
    // Generate may write to stdout; keep the console quiet for it too.
    let quiet = json_mode || matches!(cli.command, Commands::Generate(_));
    let _log_guard = match init_logging(LogConfig {
        app_name: "sunlight",
        verbose: cli.verbose,
        quiet,
        log_dir: Some(&log_dir),
    }) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    match run_command(cli.command, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(&err, json_mode),
    }
}

fn report_failure(err: &anyhow::Error, json_mode: bool) -> ExitCode {
    if json_mode {
        cli::print_json_error(err);
    } else {
        eprintln!("{:?}", err);
    }
    ExitCode::from(cli::exit_code(err))
}

fn run_command(command: Commands, settings: &Settings) -> Result<()> {
    match command {
        Commands::Run(args) => cli::run::run(args, settings),
        Commands::Plan(args) => cli::plan::run(args, settings),
        Commands::Ingest(args) => cli::ingest::run(args, settings),
        Commands::Generate(args) => cli::generate::run(args),
        Commands::Show(args) => cli::show::run(args, settings),
        Commands::Config(args) => cli::config::run(args, settings),
    }
}
