//! Command-line interface for the regime engine.

use regime_engine::analytics::ResultFormatter;
use regime_engine::config::EngineFileConfig;
use regime_engine::data::{load_csv, validate_series, DataConfig, DataSummary};
use regime_engine::error::Result;
use regime_engine::export::{ExportConfig, Exporter};
use regime_engine::hmm::HmmConfig;
use regime_engine::pipeline::{EngineConfig, RegimeEngine};
use regime_engine::strategy::ExposureTiers;
use regime_engine::RegimeError;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Regime engine - rule-based and HMM market regime detection with
/// exposure-overlay backtesting.
#[derive(Parser)]
#[command(name = "regime-engine")]
#[command(version)]
#[command(about = "Detect market risk regimes and backtest regime-aware exposure")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline on a CSV of daily bars
    Run {
        /// Path to OHLCV CSV file
        #[arg(short, long)]
        data: PathBuf,

        /// Directory for result files
        #[arg(short = 'o', long, default_value = "results")]
        out_dir: PathBuf,

        /// Number of HMM states
        #[arg(long, default_value = "3")]
        states: usize,

        /// Random seed for HMM initialization
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Maximum EM iterations
        #[arg(long, default_value = "1000")]
        max_iter: usize,

        /// Independent EM restarts
        #[arg(long, default_value = "1")]
        restarts: usize,
    },

    /// Run the pipeline from a TOML configuration file
    RunConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Write an example configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short = 'o', long, default_value = "regime.toml")]
        path: PathBuf,
    },

    /// Validate a data file and print a summary
    Validate {
        /// Path to OHLCV CSV file
        #[arg(short, long)]
        data: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        // a subscriber may already be installed when embedded
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            data,
            out_dir,
            states,
            seed,
            max_iter,
            restarts,
        } => {
            let hmm = HmmConfig {
                n_states: *states,
                seed: *seed,
                max_iter: *max_iter,
                n_restarts: *restarts,
                ..Default::default()
            };
            let config = EngineConfig {
                hmm,
                tiers: tiers_for(*states)?,
                ..Default::default()
            };
            run_pipeline(
                data,
                &DataConfig::default(),
                config,
                out_dir,
                ExportConfig::default(),
                cli.output,
            )
        }

        Commands::RunConfig { config } => run_from_config(config, cli.output),

        Commands::Init { path } => init_config(path),

        Commands::Validate { data } => validate_data(data, cli.output),
    }
}

/// Default tiers for three states; other state counts need a config file.
fn tiers_for(states: usize) -> Result<ExposureTiers> {
    let tiers = ExposureTiers::default();
    if states != tiers.len() {
        return Err(RegimeError::ConfigError(format!(
            "--states {} needs {} exposure tiers; set hmm.exposure_tiers in a config file",
            states, states
        )));
    }
    Ok(tiers)
}

fn run_pipeline(
    data_path: &Path,
    data_config: &DataConfig,
    config: EngineConfig,
    out_dir: &Path,
    export_config: ExportConfig,
    output: OutputFormat,
) -> Result<()> {
    let engine = RegimeEngine::new(config)?;

    info!("Loading data from: {}", data_path.display());
    let bars = load_csv(data_path, data_config)?;

    let report = engine.run(&bars)?;
    let written = Exporter::with_config(&report, export_config).export_all(out_dir)?;

    match output {
        OutputFormat::Text => {
            ResultFormatter::print_report(&report);
            println!("Wrote {} files to {}", written.len(), out_dir.display());
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&report)),
    }

    Ok(())
}

fn run_from_config(config_path: &Path, output: OutputFormat) -> Result<()> {
    let file_config = EngineFileConfig::load(config_path)?;
    let engine_config = file_config.to_engine_config()?;
    let data_path = file_config.data_path()?;

    run_pipeline(
        &data_path,
        &file_config.data_config()?,
        engine_config,
        Path::new(&file_config.output.dir),
        file_config.export_config(),
        output,
    )
}

fn init_config(output: &Path) -> Result<()> {
    std::fs::write(output, EngineFileConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to point at your data, then run:");
    println!("  regime-engine run-config -c {}", output.display());
    Ok(())
}

fn validate_data(data_path: &Path, output: OutputFormat) -> Result<()> {
    info!("Validating data file: {}", data_path.display());

    let bars = load_csv(data_path, &DataConfig::default())?;
    validate_series(&bars)?;
    let summary = DataSummary::from_bars(&bars)?;

    match output {
        OutputFormat::Text => {
            ResultFormatter::print_data_summary(&summary);
            println!("\nValidation: PASSED");
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
        ),
    }
    Ok(())
}
