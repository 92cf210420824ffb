//! Flowcast CLI - run the cycle computations against JSON files
//!
//! Commands:
//! - state: cycle day, phase and fertility for a date
//! - calendar: per-day phase markers for a month
//! - train: build a prediction model from a daily log
//! - predict: forecast the next cycle

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use flowcast::models::{CycleConfig, DailyRecord, PredictionModel};
use flowcast::{cycle, logging, prediction, FLOWCAST_VERSION};

/// Flowcast - on-device cycle phase and prediction core
#[derive(Parser)]
#[command(name = "flowcast")]
#[command(version = FLOWCAST_VERSION)]
#[command(about = "Cycle phase, fertility and prediction from local data", long_about = None)]
struct Cli {
    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// First day of a known period (YYYY-MM-DD)
    #[arg(long)]
    anchor: NaiveDate,

    /// Average cycle length in days
    #[arg(long, default_value = "28")]
    cycle_length: u32,

    /// Average period length in days
    #[arg(long, default_value = "5")]
    period_length: u32,
}

impl ConfigArgs {
    fn to_config(&self) -> Result<CycleConfig, CliError> {
        let config = CycleConfig::new(self.anchor, self.cycle_length, self.period_length);
        config.validate().map_err(|e| CliError::Input(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Cycle state for a date
    State {
        #[command(flatten)]
        config: ConfigArgs,

        /// Reference date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Seed for the pregnancy-chance jitter
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Phase markers for every day of a month
    Calendar {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(long)]
        year: i32,

        #[arg(long)]
        month: u32,
    },

    /// Train a prediction model from a JSON array of daily records
    Train {
        /// Records file (use - for stdin)
        #[arg(short, long)]
        records: PathBuf,

        /// Write the model here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Forecast the next cycle
    Predict {
        #[command(flatten)]
        config: ConfigArgs,

        /// Trained model file; the basic model is used when omitted
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Reference date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    Input(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    let today = Local::now().date_naive();

    match command {
        Commands::State { config, date, seed } => {
            let config = config.to_config()?;
            let reference = date.unwrap_or(today);
            let state = match seed {
                Some(seed) => cycle::compute_cycle_state_with_rng(
                    &config,
                    reference,
                    &mut StdRng::seed_from_u64(seed),
                ),
                None => cycle::compute_cycle_state(&config, reference),
            };
            print_json(&state)
        }
        Commands::Calendar {
            config,
            year,
            month,
        } => {
            let config = config.to_config()?;
            let days = cycle::month_days(&config, year, month)
                .ok_or_else(|| CliError::Input(format!("no such month {year}-{month}")))?;
            print_json(&days)
        }
        Commands::Train { records, output } => {
            let records: Vec<DailyRecord> = serde_json::from_str(&read_input(&records)?)?;
            let model = prediction::train(&records);
            tracing::info!(cycles = model.cycle_count, accuracy = model.accuracy_percent, "trained");
            match output {
                Some(path) => {
                    fs::write(path, serde_json::to_string_pretty(&model)?)?;
                    Ok(())
                }
                None => print_json(&model),
            }
        }
        Commands::Predict {
            config,
            model,
            date,
        } => {
            let config = config.to_config()?;
            let model: PredictionModel = match model {
                Some(path) => serde_json::from_str(&read_input(&path)?)?,
                None => prediction::basic_model(chrono::Utc::now()),
            };
            let result = prediction::predict(&model, &config, date.unwrap_or(today));
            print_json(&result)
        }
    }
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
