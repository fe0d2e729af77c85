mod cli_client;
mod cli_options;

use std::env::current_dir;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use common::config::{read_config, FuzzConfig};
use common::log::{init as init_tracing, TracingOptions};

use crate::cli_client::CliClient;
use crate::cli_options::CliOptions;

#[derive(Parser, Debug, Clone)]
#[command(name = "fuzz")]
#[command(version = "0.1.0")]
#[command(author = "rust-us")]
#[command(about = "Inspect and structurally fuzz binary changesets")]
#[command(long_about = None)]
struct CliArgs {
    /// Path to a TOML configuration file
    #[arg(short, long, help = "Path to loaded configuration file", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Changeset file to read
    input: PathBuf,

    /// PRNG seed for variant generation. Omit to just dump the input.
    seed: Option<u64>,

    /// Number of variants to generate. Defaults to the configured
    /// count when a seed is given but this is omitted.
    count: Option<u32>,

    #[arg(short, long, help = "enable debug logging", default_value_t = false)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = load_config(&args);
    init_tracing(TracingOptions::new_with_log_dir(
        args.debug,
        config.base.log_dir.clone(),
    ));

    let client = CliClient::new(CliOptions::new_with_log(args.debug), config);

    match client.run(&args.input, args.seed, args.count) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fuzz: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &CliArgs) -> FuzzConfig {
    match config_path(args) {
        Some(path) if path.exists() => {
            read_config(&path).unwrap_or_else(|e| {
                eprintln!("fuzz: ignoring unreadable config {}: {e}", path.display());
                FuzzConfig::default()
            })
        }
        _ => FuzzConfig::default(),
    }
}

fn config_path(args: &CliArgs) -> Option<PathBuf> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }
    let mut pwd = current_dir().unwrap_or_else(|_| PathBuf::from("."));
    pwd.push("conf");
    pwd.push("fuzz");
    pwd.set_extension("toml");
    Some(pwd)
}
