//! `genostore` command line entry point.

use clap::{Parser, Subcommand};
use gs_config::resolve_options;
use gs_core::ancestors::AncestorDataFormat;
use gs_core::logging::{init_logging, LogFormat};
use gs_core::samples::SampleDataFormat;
use gs_core::{read_format_name, read_root_attrs, AncestorData, Error, Format, Result, SampleData};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "genostore", version, about = "Inspect genostore sample and ancestor data files")]
struct Cli {
    /// Default log level when GENOSTORE_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a summary of a finalized container
    Info {
        /// Path to a sample data or ancestor data file
        path: PathBuf,
        /// Print the root attributes as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved store options and where they came from
    Config {
        /// Explicit config file (overrides GENOSTORE_CONFIG and the user config)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn run_info(path: &Path, json: bool) -> Result<()> {
    if json {
        let attrs = read_root_attrs(path)?;
        println!("{}", serde_json::to_string_pretty(&attrs)?);
        return Ok(());
    }
    let format_name = read_format_name(path)?;
    if format_name == SampleDataFormat::NAME {
        print!("{}", SampleData::load(path)?);
    } else if format_name == AncestorDataFormat::NAME {
        print!("{}", AncestorData::load(path)?);
    } else {
        return Err(Error::Format {
            expected: format!("{} or {}", SampleDataFormat::NAME, AncestorDataFormat::NAME),
            actual: format_name,
        });
    }
    Ok(())
}

fn run_config(config: Option<&Path>) -> Result<()> {
    let resolved = resolve_options(config)?;
    println!("{}", serde_json::to_string_pretty(&resolved)?);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let result = match &cli.command {
        Commands::Info { path, json } => run_info(path, *json),
        Commands::Config { config } => run_config(config.as_deref()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("genostore: {e}");
            ExitCode::from(u8::try_from(e.code()).unwrap_or(u8::MAX))
        }
    }
}
