// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use crate::config;

type LogInitFn = fn(&config::LogConfig) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "mixkit.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs mixing tasks over synthetic input streams
    Simulate {
        /// Overrides `simulate.duration_secs`
        #[arg(long)]
        duration: Option<u64>,
        /// Overrides `simulate.tasks`
        #[arg(long)]
        tasks: Option<usize>,
    },
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate a default config file and print it to stdout
    Default,
}

/// Handle the "simulate" command. Exits the process on error with status code 1.
// Allow eprintln before logging is initialized (CLI output)
#[allow(clippy::disallowed_macros)]
fn handle_simulate_command(
    config_path: &str,
    duration: Option<u64>,
    tasks: Option<usize>,
    init_logging: LogInitFn,
) {
    let mut config_result = match config::load(config_path) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        },
    };

    let _log_guard = match init_logging(&config_result.config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            std::process::exit(1);
        },
    };

    if let Some(missing_file) = &config_result.file_missing {
        warn!(config_path = %missing_file, "Config file not found, using defaults");
    }

    let simulate = &mut config_result.config.simulate;
    if let Some(duration) = duration {
        simulate.duration_secs = duration;
    }
    if let Some(tasks) = tasks {
        simulate.tasks = tasks;
    }

    info!(
        tasks = simulate.tasks,
        streams = simulate.streams,
        fps = simulate.fps,
        duration_secs = simulate.duration_secs,
        "Starting simulation"
    );

    match crate::simulate::run(&config_result.config) {
        Ok(report) => info!(
            published = report.published,
            reclaimed = report.reclaimed,
            stopped = report.stopped,
            "Simulation finished"
        ),
        Err(e) => {
            error!(error = %e, "Simulation failed");
            std::process::exit(1);
        },
    }
}

/// Handle the "config default" command - print default config to stdout
// Allow println for CLI output to stdout (intentional)
#[allow(clippy::disallowed_macros)]
fn handle_config_default_command() {
    match config::generate_default() {
        Ok(toml_string) => {
            println!("# Default mixkit configuration file");
            println!("{toml_string}");
        },
        Err(e) => {
            eprintln!("Failed to generate default config: {e}");
            std::process::exit(1);
        },
    }
}

/// Handle CLI commands
pub fn handle_command(cli: &Cli, init_logging: LogInitFn) {
    match &cli.command {
        None => handle_simulate_command(&cli.config, None, None, init_logging),
        Some(Commands::Simulate { duration, tasks }) => {
            handle_simulate_command(&cli.config, *duration, *tasks, init_logging);
        },
        Some(Commands::Config(ConfigCommands::Default)) => handle_config_default_command(),
    }
}
